//! Model catalog, quota tables, and response-family classification.
//!
//! Caller-visible model names ("grok-3-reasoning") map onto upstream model
//! names plus request options; quota accounting happens per quota family,
//! so variants share the base model's budget unless they carry their own
//! quota class.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Models advertised on `/v1/models`, in catalog order.
pub const ADVERTISED: &[&str] = &[
    "grok-3",
    "grok-3-search",
    "grok-3-imageGen",
    "grok-3-deepsearch",
    "grok-3-deepersearch",
    "grok-3-reasoning",
    "grok-4",
    "grok-4-reasoning",
    "grok-4-imageGen",
    "grok-4-deepsearch",
];

/// Credential tier. Super accounts get larger budgets and the grok-4 family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Normal,
    Super,
}

/// Per-family usage budget: how many requests before the credential rests,
/// and how long the rest lasts.
#[derive(Debug, Clone, Copy)]
pub struct QuotaRule {
    pub request_limit: u32,
    pub expiration_ms: i64,
}

const HOURS_3: i64 = 3 * 60 * 60 * 1000;
const HOURS_24: i64 = 24 * 60 * 60 * 1000;

static NORMAL_QUOTAS: LazyLock<HashMap<&'static str, QuotaRule>> = LazyLock::new(|| {
    HashMap::from([
        ("grok-3", QuotaRule { request_limit: 20, expiration_ms: HOURS_3 }),
        ("grok-3-deepsearch", QuotaRule { request_limit: 10, expiration_ms: HOURS_24 }),
        ("grok-3-deepersearch", QuotaRule { request_limit: 3, expiration_ms: HOURS_24 }),
        ("grok-3-reasoning", QuotaRule { request_limit: 8, expiration_ms: HOURS_24 }),
    ])
});

static SUPER_QUOTAS: LazyLock<HashMap<&'static str, QuotaRule>> = LazyLock::new(|| {
    HashMap::from([
        ("grok-3", QuotaRule { request_limit: 100, expiration_ms: HOURS_3 }),
        ("grok-3-deepsearch", QuotaRule { request_limit: 30, expiration_ms: HOURS_24 }),
        ("grok-3-deepersearch", QuotaRule { request_limit: 10, expiration_ms: HOURS_3 }),
        ("grok-3-reasoning", QuotaRule { request_limit: 30, expiration_ms: HOURS_3 }),
        ("grok-4", QuotaRule { request_limit: 20, expiration_ms: HOURS_3 }),
    ])
});

/// Caller model → quota family, as an enumerated lookup so family
/// membership stays auditable. Variants without their own quota class
/// charge the base model's budget.
static QUOTA_FAMILY: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("grok-3", "grok-3"),
        ("grok-3-search", "grok-3"),
        ("grok-3-imageGen", "grok-3"),
        ("grok-3-deepsearch", "grok-3-deepsearch"),
        ("grok-3-deepersearch", "grok-3-deepersearch"),
        ("grok-3-reasoning", "grok-3-reasoning"),
        ("grok-4", "grok-4"),
        ("grok-4-reasoning", "grok-4"),
        ("grok-4-imageGen", "grok-4"),
        ("grok-4-deepsearch", "grok-4"),
    ])
});

/// Quota family charged for a caller-visible model, or `None` if the model
/// is not recognized.
pub fn quota_family(model: &str) -> Option<&'static str> {
    QUOTA_FAMILY.get(model).copied()
}

/// Upstream model name sent in the chat payload.
pub fn upstream_name(model: &str) -> &'static str {
    if model.starts_with("grok-4") {
        "grok-4"
    } else {
        "grok-3"
    }
}

/// Quota rule for a family at a given tier. `None` means the tier has no
/// budget for the family (normal accounts cannot serve grok-4).
pub fn quota_rule(family: &str, tier: Tier) -> Option<QuotaRule> {
    let table = match tier {
        Tier::Normal => &*NORMAL_QUOTAS,
        Tier::Super => &*SUPER_QUOTAS,
    };
    table.get(family).copied()
}

/// Families a credential of the given tier participates in.
pub fn families_for_tier(tier: Tier) -> Vec<&'static str> {
    let table = match tier {
        Tier::Normal => &*NORMAL_QUOTAS,
        Tier::Super => &*SUPER_QUOTAS,
    };
    let mut families: Vec<_> = table.keys().copied().collect();
    families.sort_unstable();
    families
}

/// How the response stream for a model is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFamily {
    /// Plain chat: emit every token.
    Plain,
    /// Plain chat that must drop thinking tokens (reasoning-capable
    /// upstream model called without the reasoning suffix).
    PlainFiltered,
    /// Image generation: swallow text, emit fetched image markdown.
    ImageGen,
    /// Web search: append formatted results after the message.
    Search,
    /// Deep search: stream only final-answer tokens, plus intermediate
    /// steps when thinking is shown.
    DeepSearch,
    /// Reasoning model where upstream marks tokens with `isThinking`.
    Reasoning,
    /// Reasoning model that inlines its own thinking-tag markers.
    ReasoningTagged,
}

/// Classify a caller-visible model for stream interpretation.
pub fn response_family(model: &str) -> ResponseFamily {
    match model {
        "grok-3-imageGen" | "grok-4-imageGen" => ResponseFamily::ImageGen,
        "grok-3-search" => ResponseFamily::Search,
        "grok-3-deepsearch" | "grok-3-deepersearch" | "grok-4-deepsearch" => {
            ResponseFamily::DeepSearch
        }
        "grok-3-reasoning" => ResponseFamily::Reasoning,
        "grok-4-reasoning" => ResponseFamily::ReasoningTagged,
        "grok-4" => ResponseFamily::PlainFiltered,
        _ => ResponseFamily::Plain,
    }
}

/// Models that keep only the latest user message in the transcript.
pub fn single_turn(model: &str) -> bool {
    matches!(model, "grok-3-imageGen" | "grok-4-imageGen" | "grok-3-deepsearch")
}

/// Search-tool toggle for the upstream payload. Deep-search presets carry
/// their own switch, so only the plain search variants set this.
pub fn search_enabled(model: &str) -> bool {
    matches!(model, "grok-3-search" | "grok-4-deepsearch")
}

/// Deep-search preset name for the upstream payload, if any.
pub fn deepsearch_preset(model: &str) -> Option<&'static str> {
    match model {
        "grok-3-deepsearch" => Some("default"),
        "grok-3-deepersearch" => Some("deeper"),
        _ => None,
    }
}

/// Reasoning toggle for the upstream payload. grok-4 handles reasoning
/// internally and must not be flagged.
pub fn reasoning_enabled(model: &str) -> bool {
    model == "grok-3-reasoning"
}

/// Image-generation variants.
pub fn is_image_gen(model: &str) -> bool {
    matches!(model, "grok-3-imageGen" | "grok-4-imageGen")
}
