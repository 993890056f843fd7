//! 启发式文本分类器
//!
//! 候选事实的低价值过滤、问候剥离，以及情景召回用到的
//! 延续性查询识别、低信息量判断和信息密度打分。

use std::collections::HashSet;

use once_cell::sync::Lazy;
use orion_vector::Metadata;
use regex::Regex;

use crate::text::normalize;

/// 可替换的分类能力
pub trait Classifier: Send + Sync {
    /// 候选事实是否应被拦截
    fn is_low_value(&self, text: &str, meta: Option<&Metadata>) -> bool;

    /// 去掉开头的问候语，仅当剩余部分仍含 URL、路径或保留词时生效
    fn strip_leading_greeting(&self, text: &str) -> String;

    /// "还记得上次…" 这类需要接续历史的查询
    fn is_continuity_query(&self, query: &str) -> bool;

    /// 寒暄、确认之类几乎不含信息的文本
    fn is_low_substance(&self, text: &str) -> bool;

    /// [0, 1]，越长越像技术内容分数越高
    fn info_density(&self, text: &str) -> f32;
}

const BAD_TAGS: [&str; 5] = ["greeting", "compliment", "smalltalk", "pleasantry", "filler"];

macro_rules! regex {
    ($name:ident, $pattern:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pattern).expect("valid regex"));
    };
}

regex!(
    KEEP_HINT_RE,
    r"(?i)\b(?:prefer|preference|use|using|always|never|default|windows|powershell|linux|macos|config|yaml|path|folder|directory|repo|github|url|chroma|embedding|model|dimension|endpoint|localhost|api)(?:s|d|ed|red|ring)?\b"
);
regex!(
    GREETING_RE,
    r"(?i)^\s*(?:hi|hello|hey|hiya|yo|greetings)\b|^\s*good\s+(?:morning|afternoon|evening|day)\b"
);
regex!(HOW_ARE_YOU_RE, r"(?i)^\s*how\s+are\s+you\b");
regex!(
    COMPLIMENT_RE,
    r"(?i)^\s*(?:thank(?:s| you)|appreciate it|you're the best|you are the best|you're amazing|you are amazing|you're awesome|you are awesome|wonderful|great job)\b"
);
// 允许多个确认词连用，如 "ok thanks"
regex!(
    ACK_RE,
    r"(?i)^\s*(?:(?:ok|okay|k|kk|sure|yep|yeah|nah|nope|got it|understood|roger|ack|thanks|thank you|ty|lol|lmao)\b[!. ,]*)+$"
);
regex!(
    TRUTHBOMB_RE,
    r"(?i)\b(?:as an ai|language model|chatgpt|openai|not sentient|no consciousness|i don'?t have feelings|i can'?t feel|i am an assistant|i'?m an assistant|artificial intelligence)\b"
);
regex!(
    TEMPORAL_RE,
    r"(?i)\b(?:yesterday|today|tonight|tomorrow|last night|last weekend|this weekend|this morning|earlier|recently|just now|a while ago|a couple of days|monday|tuesday|wednesday|thursday|friday|saturday|sunday|jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\b"
);
regex!(
    STORY_START_RE,
    r"(?i)^\s*i\s+(?:went|visited|made it|didn'?t make it|was|were|had|got|woke up|slept|ate|drove|saw|met)\b"
);
regex!(URL_RE, r"(?i)https?://");
regex!(PATH_RE, r"\b[A-Za-z]:\\");
regex!(WORD_RE, r"[a-z0-9']+");

regex!(
    STRIP_GREETING_RE,
    r"(?i)^\s*(?:hi|hello|hey|hiya|yo|greetings)\b[\s,:\-–—]*"
);
regex!(
    STRIP_GOOD_X_RE,
    r"(?i)^\s*good\s+(?:morning|afternoon|evening|day)\b[\s,:\-–—]*"
);
regex!(STRIP_HOW_ARE_YOU_RE, r"(?i)^\s*how\s+are\s+you\b[\s,:\-–—]*");

regex!(
    CONTINUITY_RE,
    r"(?i)\b(?:remember|recall|last time|left off|leave off|pick up where|carry on|continue where|where were we|previously|earlier we|we talked about|we discussed|we were (?:talking|working|discussing)|what do (?:we|you) know about me|our last (?:chat|conversation|session))\b"
);
regex!(
    SMALLTALK_RE,
    r"(?i)^\s*(?:what'?s up|sup|how'?s it going|how is it going|how'?s your day|how have you been|nice to (?:meet|see) you|good night|goodnight|bye|see you|see ya|i'?m (?:good|fine|ok|okay|great|well|doing well))\b"
);
regex!(TECH_CHARS_RE, r"[_/\\:=<>{}\[\]()`#@.$-]");

fn words(lower: &str) -> Vec<&str> {
    WORD_RE.find_iter(lower).map(|m| m.as_str()).collect()
}

fn has_keep_hint(text: &str) -> bool {
    KEEP_HINT_RE.is_match(text)
}

fn has_durable_anchor(text: &str) -> bool {
    URL_RE.is_match(text) || PATH_RE.is_match(text) || has_keep_hint(text)
}

/// 逗号分隔字符串形式的标签集合，小写
pub fn tags_to_set(meta: &Metadata) -> HashSet<String> {
    meta.get("tags")
        .map(|v| {
            v.to_string()
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// metadata 中的 confidence，不可解析时为 0.0
pub fn metadata_confidence(meta: &Metadata) -> f64 {
    meta.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0)
}

/// 带时间词或叙事开头的一次性经历，不适合作为长期事实
pub fn is_timebound_story(text: &str) -> bool {
    let clean = normalize(text);
    if clean.is_empty() {
        return true;
    }
    if has_durable_anchor(&clean) {
        return false;
    }
    let wc = words(&clean.to_lowercase()).len();
    wc >= 6 && (TEMPORAL_RE.is_match(&clean) || STORY_START_RE.is_match(&clean))
}

/// 基于关键词和正则的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Classifier for KeywordClassifier {
    fn is_low_value(&self, text: &str, meta: Option<&Metadata>) -> bool {
        let clean = normalize(text);
        if clean.is_empty() {
            return true;
        }
        let lower = clean.to_lowercase();
        let wc = words(&lower).len();

        if wc <= 6 && ACK_RE.is_match(&clean) {
            return true;
        }
        if TRUTHBOMB_RE.is_match(&clean) {
            return true;
        }
        if is_timebound_story(&clean) {
            return true;
        }
        // URL、路径、保留词任一出现即不拦截
        if has_durable_anchor(&clean) {
            return false;
        }
        if let Some(meta) = meta {
            let tags = tags_to_set(meta);
            if BAD_TAGS.iter().any(|bad| tags.contains(*bad)) {
                return true;
            }
        }
        if wc <= 12 && (GREETING_RE.is_match(&lower) || HOW_ARE_YOU_RE.is_match(&lower)) {
            return true;
        }
        wc <= 18 && COMPLIMENT_RE.is_match(&lower)
    }

    fn strip_leading_greeting(&self, text: &str) -> String {
        let clean = normalize(text);
        if clean.is_empty() {
            return clean;
        }
        if !(GREETING_RE.is_match(&clean) || HOW_ARE_YOU_RE.is_match(&clean)) {
            return clean;
        }

        let stripped = STRIP_GREETING_RE.replace(&clean, "");
        let stripped = STRIP_GOOD_X_RE.replace(&stripped, "");
        let stripped = normalize(&STRIP_HOW_ARE_YOU_RE.replace(&stripped, ""));

        if !stripped.is_empty() && has_durable_anchor(&stripped) {
            stripped
        } else {
            clean
        }
    }

    fn is_continuity_query(&self, query: &str) -> bool {
        CONTINUITY_RE.is_match(query)
    }

    fn is_low_substance(&self, text: &str) -> bool {
        let clean = normalize(text);
        let lower = clean.to_lowercase();
        let wc = words(&lower).len();
        if wc < 4 {
            return true;
        }
        if wc > 12 {
            return false;
        }
        ACK_RE.is_match(&clean)
            || GREETING_RE.is_match(&lower)
            || HOW_ARE_YOU_RE.is_match(&lower)
            || COMPLIMENT_RE.is_match(&lower)
            || SMALLTALK_RE.is_match(&lower)
    }

    fn info_density(&self, text: &str) -> f32 {
        let lower = normalize(text).to_lowercase();
        let tokens = words(&lower);
        if tokens.is_empty() {
            return 0.0;
        }
        let wc = tokens.len() as f32;
        let length = (wc / 40.0).min(1.0);
        let unique = tokens.iter().collect::<HashSet<_>>().len() as f32 / wc;

        let technical_tokens = tokens
            .iter()
            .filter(|t| t.len() >= 9 || t.chars().any(|c| c.is_ascii_digit()))
            .count() as f32;
        let symbol_hits = TECH_CHARS_RE.find_iter(&lower).count() as f32;
        let technical = ((technical_tokens + 0.5 * symbol_hits) / wc * 2.0).min(1.0);

        (0.6 * length * (0.5 + 0.5 * unique) + 0.4 * technical).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion_vector::MetaValue;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::new()
    }

    #[test]
    fn test_acknowledgements_are_low_value() {
        let c = classifier();
        assert!(c.is_low_value("ok thanks", None));
        assert!(c.is_low_value("Got it!", None));
        assert!(c.is_low_value("   ", None));
        assert!(c.is_low_value("yeah, ok.", None));
    }

    #[test]
    fn test_durable_preferences_pass() {
        let c = classifier();
        assert!(!c.is_low_value("I prefer using PowerShell on Windows for this repo", None));

        let stripped = c.strip_leading_greeting("Hi, I always use C:\\Orion\\ as my project root");
        assert_eq!(stripped, "I always use C:\\Orion\\ as my project root");
        assert!(!c.is_low_value(&stripped, None));
    }

    #[test]
    fn test_greeting_strip_requires_keep_hint() {
        let c = classifier();
        assert_eq!(c.strip_leading_greeting("Hello there friend"), "Hello there friend");
        assert_eq!(
            c.strip_leading_greeting("Good morning: my config lives in config.yaml"),
            "my config lives in config.yaml"
        );
        assert_eq!(c.strip_leading_greeting("plain text"), "plain text");
    }

    #[test]
    fn test_truthbomb_and_story_blocked() {
        let c = classifier();
        assert!(c.is_low_value("As an AI language model I cannot have opinions", None));
        assert!(c.is_low_value("I went to the lake with my cousin and we had fun", None));
        assert!(c.is_low_value("Tonight we are ordering pizza for the whole family", None));
        // 带路径的叙述保留
        assert!(!is_timebound_story("Yesterday I moved the project to D:\\work\\orion for good"));
    }

    #[test]
    fn test_tag_and_smalltalk_blocks() {
        let c = classifier();
        let mut meta = Metadata::new();
        meta.insert("tags".to_string(), MetaValue::from("Greeting, misc"));
        assert!(c.is_low_value("The weather is lovely where I live", Some(&meta)));
        assert!(!c.is_low_value("The weather is lovely where I live", None));

        assert!(c.is_low_value("hey there buddy", None));
        assert!(c.is_low_value("how are you doing this fine evening", None));
        assert!(c.is_low_value("thank you so much, that really helped me out", None));
        assert!(!c.is_low_value("My cat is named Pixel and she is seven", None));
    }

    #[test]
    fn test_url_and_path_anchors_override_soft_blocks() {
        let c = classifier();
        assert!(!c.is_low_value("hey, grab it at https://foo.io/x", None));

        let mut meta = Metadata::new();
        meta.insert("tags".to_string(), MetaValue::from("smalltalk"));
        assert!(!c.is_low_value("The docs live at https://foo.io/docs", Some(&meta)));

        assert!(!c.is_low_value("Thanks, builds go to D:\\work\\out", None));

        // 确认语和自我披露不受锚点豁免
        assert!(c.is_low_value("As an AI language model see https://foo.io", None));
    }

    #[test]
    fn test_greeting_strip_keeps_url_and_path_remainder() {
        let c = classifier();
        assert_eq!(
            c.strip_leading_greeting("hey, grab it at https://foo.io/x"),
            "grab it at https://foo.io/x"
        );
        assert_eq!(
            c.strip_leading_greeting("Hello - builds go to D:\\work\\out"),
            "builds go to D:\\work\\out"
        );
    }

    #[test]
    fn test_keep_hint_word_boundaries() {
        assert!(has_keep_hint("she prefers tabs"));
        assert!(has_keep_hint("edit config.yaml"));
        assert!(!has_keep_hint("a rapid response"));
        assert!(!has_keep_hint("because of that"));
    }

    #[test]
    fn test_continuity_query() {
        let c = classifier();
        assert!(c.is_continuity_query("what do we remember about the project?"));
        assert!(c.is_continuity_query("Where did we leave off last time"));
        assert!(!c.is_continuity_query("how do I install rust"));
    }

    #[test]
    fn test_low_substance() {
        let c = classifier();
        assert!(c.is_low_substance("hello there"));
        assert!(c.is_low_substance("hey how are you doing today my friend"));
        assert!(c.is_low_substance("ok thanks"));
        assert!(!c.is_low_substance("the build fails because rusqlite needs the bundled feature"));
    }

    #[test]
    fn test_info_density_ordering() {
        let c = classifier();
        let phatic = c.info_density("hi there");
        let technical = c.info_density(
            "set embedding.dimensions to 768 in config.yaml and restart the ollama server on port 11434",
        );
        assert!(technical > phatic);
        assert!((0.0..=1.0).contains(&technical));
        assert_eq!(c.info_density(""), 0.0);
    }

    #[test]
    fn test_metadata_confidence() {
        let mut meta = Metadata::new();
        assert_eq!(metadata_confidence(&meta), 0.0);
        meta.insert("confidence".to_string(), MetaValue::from("0.7"));
        assert!((metadata_confidence(&meta) - 0.7).abs() < 1e-9);
        meta.insert("confidence".to_string(), MetaValue::Float(0.5));
        assert!((metadata_confidence(&meta) - 0.5).abs() < 1e-9);
    }
}
