//! `relaymind analyze`: score a text without running it.

use relaymind_agent::ComplexityAnalyzer;

pub fn run(text: &str) {
    let score = ComplexityAnalyzer::new().analyze_text(text);

    println!("  Tier:       {}", score.tier);
    println!("  Score:      {}", score.score);
    println!("  Min steps:  {}", score.min_steps);
    if score.signals.is_empty() {
        println!("  Signals:    (none)");
    } else {
        println!("  Signals:    {}", score.signals.join(", "));
    }
    if score.is_high() {
        println!("  Advanced model and review pass enabled");
    }
}
