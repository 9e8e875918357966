//! Complexity analysis: score a request and derive its reasoning budget.
//!
//! Signals are detected independently and summed:
//!
//! | Signal                       | Weight |
//! |------------------------------|--------|
//! | code generation intent       | +4     |
//! | math / computation intent    | +4     |
//! | multi-step shell / CLI work  | +3     |
//! | every 2000 estimated tokens  | +1     |
//! | ambiguous phrasing           | +2     |
//!
//! Scores 0-4 are LOW (no minimum), 5-9 MEDIUM, 10 and up HIGH. HIGH also
//! routes to the advanced model and enables a review pass.

use regex::Regex;
use relaymind_core::message::Request;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const CODE_WEIGHT: u32 = 4;
const MATH_WEIGHT: u32 = 4;
const SHELL_WEIGHT: u32 = 3;
const AMBIGUITY_WEIGHT: u32 = 2;
const TOKENS_PER_POINT: usize = 2000;

const MEDIUM_THRESHOLD: u32 = 5;
const HIGH_THRESHOLD: u32 = 10;

/// Reasoning tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    pub fn from_score(score: u32) -> Self {
        if score >= HIGH_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Minimum reasoning steps before an answer or command is accepted.
    pub fn min_steps(&self, score: u32) -> usize {
        let base = score.saturating_sub(2) as usize;
        match self {
            Self::Low => 0,
            Self::Medium => base.clamp(3, 8),
            Self::High => base.clamp(8, 15),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// The analyzer's verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityScore {
    pub score: u32,
    pub tier: Tier,
    pub min_steps: usize,
    /// Names of the signals that fired
    pub signals: Vec<String>,
}

impl ComplexityScore {
    fn low() -> Self {
        Self {
            score: 0,
            tier: Tier::Low,
            min_steps: 0,
            signals: Vec::new(),
        }
    }

    /// HIGH tier requests get the advanced model and a review pass.
    pub fn is_high(&self) -> bool {
        self.tier == Tier::High
    }
}

/// A named pattern set that fires when any of its patterns match.
struct Detector {
    patterns: Vec<Regex>,
}

impl Detector {
    fn new(name: &str, patterns: &[&str]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(detector = name, pattern = *p, error = %e, "Skipping invalid pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }
}

/// Pure, deterministic request scorer.
pub struct ComplexityAnalyzer {
    code_verb: Detector,
    code_noun: Detector,
    code_block: Detector,
    math: Detector,
    shell: Detector,
    multi_step: Detector,
    ambiguity: Detector,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityAnalyzer {
    pub fn new() -> Self {
        Self {
            code_verb: Detector::new(
                "code_verb",
                &[r"(?i)\b(write|implement|generate|create|build|refactor|debug|fix|optimi[sz]e)\b"],
            ),
            code_noun: Detector::new(
                "code_noun",
                &[
                    r"(?i)\b(function|class|method|struct|module|program|code|api|endpoint|algorithm|regex|unit tests?|library|component)\b",
                    r"(?i)\b(python|rust|javascript|typescript|java|golang|cpp|sql|kotlin|swift)\b",
                ],
            ),
            code_block: Detector::new("code_block", &[r"```"]),
            math: Detector::new(
                "math",
                &[
                    r"(?i)\b(calculate|compute|solve|integral|integrate|derivative|differentiate|equation|probability|matrix|matrices|eigen\w*|logarithm|theorem|prove|statistics|variance|polynomial)\b",
                    // Two or more chained binary operators, e.g. 3 * (4 + 5)
                    r"\d+(?:\.\d+)?\s*[-+*/^%×÷]\s*\(?\s*\d+(?:\.\d+)?\s*\)?\s*[-+*/^%×÷]\s*\(?\s*\d",
                ],
            ),
            shell: Detector::new(
                "shell",
                &[r"(?i)\b(bash|shell|terminal|command line|cli|docker|kubectl|git|npm|cargo|pip|ssh|deploy|install|chmod|grep|cron)\b"],
            ),
            multi_step: Detector::new(
                "multi_step",
                &[
                    r"(?i)\b(then|first|next|afterwards|finally|step \d+|followed by)\b",
                    r"(?m)^\s*\d+[.)]\s+\S",
                ],
            ),
            ambiguity: Detector::new(
                "ambiguity",
                &[r"(?i)\b(something|somehow|whatever|stuff|maybe|not sure|kind of|sort of|best way|or so)\b"],
            ),
        }
    }

    /// Score the latest user turn of a request, with size taken from the whole request.
    pub fn analyze(&self, request: &Request) -> ComplexityScore {
        let text = request.latest_user_text();
        self.score(&text, request.estimated_tokens())
    }

    /// Score free text on its own.
    pub fn analyze_text(&self, text: &str) -> ComplexityScore {
        self.score(text, text.len() / 4)
    }

    fn score(&self, text: &str, estimated_tokens: usize) -> ComplexityScore {
        if text.trim().is_empty() {
            return ComplexityScore::low();
        }

        let mut score = 0u32;
        let mut signals = Vec::new();
        let mut fire = |name: &str, weight: u32| {
            score += weight;
            signals.push(name.to_string());
        };

        if self.code_block.matches(text) || (self.code_verb.matches(text) && self.code_noun.matches(text)) {
            fire("code_generation", CODE_WEIGHT);
        }
        if self.math.matches(text) {
            fire("math", MATH_WEIGHT);
        }
        if self.shell.matches(text) && self.multi_step.matches(text) {
            fire("multi_step_shell", SHELL_WEIGHT);
        }
        let size_points = (estimated_tokens / TOKENS_PER_POINT) as u32;
        if size_points > 0 {
            fire("input_size", size_points);
        }
        if self.ambiguity.matches(text) {
            fire("ambiguity", AMBIGUITY_WEIGHT);
        }

        let tier = Tier::from_score(score);
        let min_steps = tier.min_steps(score);
        debug!(score, %tier, min_steps, ?signals, "Scored request complexity");
        ComplexityScore {
            score,
            tier,
            min_steps,
            signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(text: &str) -> ComplexityScore {
        ComplexityAnalyzer::new().analyze(&Request::single("default", text))
    }

    #[test]
    fn simple_arithmetic_is_low() {
        let score = analyze("What is 2+2?");
        assert_eq!(score.tier, Tier::Low);
        assert_eq!(score.min_steps, 0);
        assert_eq!(score.score, 0);
    }

    #[test]
    fn file_search_with_steps_is_medium() {
        let score = analyze(
            "Search the files in my repo for the deploy script, then show me how to run it in bash, or something like that",
        );
        assert_eq!(score.score, 5);
        assert_eq!(score.tier, Tier::Medium);
        assert_eq!(score.min_steps, 3);
        assert!(score.signals.contains(&"multi_step_shell".to_string()));
        assert!(score.signals.contains(&"ambiguity".to_string()));
    }

    #[test]
    fn code_and_math_is_high() {
        let score = analyze(
            "Write a Python function to compute the integral of a polynomial, then deploy it with docker",
        );
        assert_eq!(score.score, 11);
        assert_eq!(score.tier, Tier::High);
        assert_eq!(score.min_steps, 9);
        assert!(score.is_high());
    }

    #[test]
    fn empty_input_is_low() {
        assert_eq!(analyze(""), ComplexityScore::low());
        assert_eq!(analyze("   \n\t "), ComplexityScore::low());
    }

    #[test]
    fn chained_operators_count_as_math() {
        let score = analyze("3 * (4 + 5) - 2");
        assert!(score.signals.contains(&"math".to_string()));
        assert!(!analyze("2+2").signals.contains(&"math".to_string()));
    }

    #[test]
    fn shell_terms_alone_are_not_multi_step() {
        let score = analyze("What does git status do?");
        assert!(!score.signals.contains(&"multi_step_shell".to_string()));

        let listed = analyze("1. install docker\n2. pull the image");
        assert!(listed.signals.contains(&"multi_step_shell".to_string()));
    }

    #[test]
    fn code_fence_counts_as_code() {
        let score = analyze("Why does this panic?\n```rust\nlet x: u8 = 256;\n```");
        assert!(score.signals.contains(&"code_generation".to_string()));
    }

    #[test]
    fn large_input_adds_size_points() {
        let text = "lorem ipsum ".repeat(4000);
        let score = analyze(&text);
        assert!(score.signals.contains(&"input_size".to_string()));
        assert_eq!(score.score, (text.len() / 4 / 2000) as u32);
    }

    #[test]
    fn budgets_clamp_per_tier() {
        assert_eq!(Tier::Medium.min_steps(5), 3);
        assert_eq!(Tier::Medium.min_steps(9), 7);
        assert_eq!(Tier::High.min_steps(10), 8);
        assert_eq!(Tier::High.min_steps(40), 15);
        assert_eq!(Tier::Low.min_steps(4), 0);
    }

    #[test]
    fn analysis_is_deterministic() {
        let text = "Maybe refactor this class and then deploy with git";
        assert_eq!(analyze(text), analyze(text));
    }

    #[test]
    fn tier_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Tier::High).unwrap(), r#""HIGH""#);
    }
}
