//! Phonetic encodings and similarity scoring for wake-phrase matching
//!
//! A transcript and each configured wake phrase are compared through four
//! encodings — full syllables, initials, tonal syllables, and finals — so
//! that recognition slips (a swapped syllable, a missing tone) still match.
//! Han characters romanize through pinyin; Latin characters pass through
//! lowercased.

use pinyin::ToPinyin;

/// The four phonetic renderings of a text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhoneticVariants {
    /// Concatenated plain syllables ("nihao")
    pub syllables: String,
    /// First letter of each syllable ("nh")
    pub initials: String,
    /// Syllables with tone marks ("nǐhǎo")
    pub tonal: String,
    /// Syllables with the leading consonant stripped ("iao")
    pub finals: String,
}

impl PhoneticVariants {
    /// Whether every variant is empty (no usable characters).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.syllables.is_empty() && self.initials.is_empty()
    }

    fn variant(&self, kind: VariantKind) -> &str {
        match kind {
            VariantKind::Syllables => &self.syllables,
            VariantKind::Initials => &self.initials,
            VariantKind::Tonal => &self.tonal,
            VariantKind::Finals => &self.finals,
        }
    }
}

/// Which encoding produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Syllables,
    Initials,
    Tonal,
    Finals,
}

const ALL_VARIANTS: [VariantKind; 4] = [
    VariantKind::Syllables,
    VariantKind::Tonal,
    VariantKind::Initials,
    VariantKind::Finals,
];

/// A wake phrase with its precomputed encodings.
#[derive(Debug, Clone)]
pub struct WakePattern {
    /// The phrase as configured
    pub original: String,
    /// Its phonetic renderings
    pub variants: PhoneticVariants,
}

impl WakePattern {
    /// Precompute the encodings for a wake phrase.
    #[must_use]
    pub fn new(phrase: &str) -> Self {
        Self {
            original: phrase.to_string(),
            variants: encode(phrase),
        }
    }
}

/// Encode a text into its four phonetic variants.
///
/// Characters that are neither Han nor alphanumeric are dropped, matching
/// how recognizer output is cleaned before comparison.
#[must_use]
pub fn encode(text: &str) -> PhoneticVariants {
    let mut variants = PhoneticVariants::default();

    for ch in text.chars() {
        if let Some(syllable) = ch.to_pinyin() {
            let plain = syllable.plain();
            variants.syllables.push_str(plain);
            if let Some(first) = plain.chars().next() {
                variants.initials.push(first);
            }
            variants.tonal.push_str(syllable.with_tone());
            variants.finals.push_str(strip_initial(plain));
        } else if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                variants.syllables.push(lower);
                variants.tonal.push(lower);
                variants.finals.push(lower);
            }
            if ch.is_ascii_alphanumeric() {
                variants.initials.push(ch.to_ascii_lowercase());
            }
        }
    }

    variants
}

/// Strip the initial consonant from a pinyin syllable, leaving the final.
fn strip_initial(syllable: &str) -> &str {
    for prefix in ["zh", "ch", "sh"] {
        if let Some(rest) = syllable.strip_prefix(prefix) {
            return rest;
        }
    }

    let mut chars = syllable.chars();
    match chars.next() {
        Some(c) if "bpmfdtnlgkhjqxrzcsyw".contains(c) => chars.as_str(),
        _ => syllable,
    }
}

/// Score a transcript's variants against one wake pattern.
///
/// Returns the best similarity in `[0, 1]` and the variant that produced
/// it. Exact substring containment short-circuits at 1.0; otherwise the
/// score is the best of sequence similarity, normalized edit distance
/// (short patterns only), and an initials-subsequence floor.
#[must_use]
pub fn similarity(
    text: &PhoneticVariants,
    pattern: &PhoneticVariants,
    max_edit_distance: usize,
) -> (f64, Option<VariantKind>) {
    let mut best = 0.0f64;
    let mut best_kind = None;

    for kind in ALL_VARIANTS {
        let text_variant = text.variant(kind);
        let pattern_variant = pattern.variant(kind);

        if text_variant.is_empty() || pattern_variant.is_empty() {
            continue;
        }

        if text_variant.contains(pattern_variant) {
            return (1.0, Some(kind));
        }

        let mut score = strsim::sorensen_dice(text_variant, pattern_variant);

        let pattern_len = pattern_variant.chars().count();
        if pattern_len <= 10 {
            let distance = strsim::levenshtein(text_variant, pattern_variant);
            let allowed = max_edit_distance.min(pattern_len / 2);
            if distance <= allowed {
                #[allow(clippy::cast_precision_loss)]
                let edit_score = 1.0 - distance as f64 / pattern_len as f64;
                score = score.max(edit_score);
            }
        }

        if kind == VariantKind::Initials
            && pattern_len >= 2
            && is_subsequence(pattern_variant, text_variant)
        {
            score = score.max(0.80);
        }

        if score > best {
            best = score;
            best_kind = Some(kind);
        }
    }

    (best, best_kind)
}

/// Whether `pattern`'s characters appear in `text` in order.
fn is_subsequence(pattern: &str, text: &str) -> bool {
    let mut pattern_chars = pattern.chars().peekable();
    for ch in text.chars() {
        if pattern_chars.peek() == Some(&ch) {
            pattern_chars.next();
        }
    }
    pattern_chars.peek().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_han_text() {
        let variants = encode("你好");
        assert_eq!(variants.syllables, "nihao");
        assert_eq!(variants.initials, "nh");
        assert_eq!(variants.finals, "iao");
        assert!(!variants.tonal.is_empty());
    }

    #[test]
    fn encodes_latin_text_lowercased() {
        let variants = encode("Hey Chime!");
        assert_eq!(variants.syllables, "heychime");
        assert_eq!(variants.initials, "heychime");
    }

    #[test]
    fn punctuation_is_dropped() {
        assert_eq!(encode("a,b.c").syllables, "abc");
        assert!(encode("...").is_empty());
    }

    #[test]
    fn strips_compound_initials() {
        assert_eq!(strip_initial("zhong"), "ong");
        assert_eq!(strip_initial("chi"), "i");
        assert_eq!(strip_initial("ni"), "i");
        // No leading consonant: unchanged
        assert_eq!(strip_initial("ai"), "ai");
    }

    #[test]
    fn exact_substring_scores_one() {
        let text = encode("say hello chime now");
        let pattern = WakePattern::new("hello chime");

        let (score, kind) = similarity(&text, &pattern.variants, 1);
        assert!((score - 1.0).abs() < f64::EPSILON);
        assert_eq!(kind, Some(VariantKind::Syllables));
    }

    #[test]
    fn one_edit_away_still_scores_high() {
        // One substituted character: edit distance 1 on a 10-char pattern
        let text = encode("hellochime");
        let pattern = WakePattern::new("hallochime");

        let (score, _) = similarity(&text, &pattern.variants, 1);
        assert!(score >= 0.85, "edit distance 1 should clear 0.85, got {score}");
    }

    #[test]
    fn unrelated_text_scores_low() {
        let text = encode("completely different words");
        let pattern = WakePattern::new("hello chime");

        let (score, _) = similarity(&text, &pattern.variants, 1);
        assert!(score < 0.5, "unrelated text scored {score}");
    }

    #[test]
    fn initials_subsequence_floors_at_080() {
        let pattern = PhoneticVariants {
            syllables: "zzqq".to_string(),
            initials: "ac".to_string(),
            tonal: "zzqq".to_string(),
            finals: "zzqq".to_string(),
        };
        let text = PhoneticVariants {
            syllables: "xxyy".to_string(),
            initials: "abc".to_string(),
            tonal: "xxyy".to_string(),
            finals: "xxyy".to_string(),
        };

        let (score, kind) = similarity(&text, &pattern, 0);
        assert!(score >= 0.80);
        assert_eq!(kind, Some(VariantKind::Initials));
    }

    #[test]
    fn subsequence_check() {
        assert!(is_subsequence("abc", "aXbXc"));
        assert!(!is_subsequence("abc", "acb"));
        assert!(is_subsequence("", "anything"));
    }
}
