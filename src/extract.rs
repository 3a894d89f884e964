//! Field extraction from rendered seller pages
//!
//! Pure functions over page text. A field that cannot be found stays at its
//! default; nothing here fails.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::seller::{EntityType, ExtractionResult, ReputationMetrics};

/// Heading that opens the company details block on the seller information panel
const COMPANY_SECTION_MARKER: &str = "Dane firmy";
const SUPER_SELLER_MARKER: &str = "Super sprzedawca";
const CATEGORY_MARKER: &str = "z kategorii";
const LIMITED_COMPANY_MARKER: &str = "sp. z o.o";

static NIP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"NIP[:\s\-]*([0-9]{10})").unwrap()
});

static REGON_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"REGON[:\s\-]*([0-9]{9,14})").unwrap()
});

static KRS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"KRS[:\s\-]*([0-9]{10})").unwrap()
});

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z0-9_.+\-]+@[a-zA-Z0-9\-]+\.[a-zA-Z0-9.\-]+").unwrap()
});

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?48?\s?[0-9]{3}\s?[0-9]{3}\s?[0-9]{3}").unwrap()
});

static BANK_ACCOUNT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[0-9]{2}\s?[0-9]{4}\s?[0-9]{4}\s?[0-9]{4}\s?[0-9]{4}\s?[0-9]{4}\s?[0-9]{4}\b").unwrap()
});

static PERCENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]{1,3})%").unwrap()
});

static YEARS_SINCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"od\s+([0-9]+)\s+lat").unwrap()
});

// tenure phrasing without "od"
static YEARS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:sprzedaje|na allegro)\s+([0-9]+)\s+lat\b").unwrap()
});

static POSITIVE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9]+)\s+pozytywn").unwrap()
});

static NEGATIVE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9]+)\s+negatywn").unwrap()
});

static NEUTRAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9]+)\s+neutraln").unwrap()
});

static TOTAL_FEEDBACK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9]+)\s+ocen").unwrap()
});

/// Extract business identity fields from the seller information text
pub fn extract_company(text: &str) -> ExtractionResult {
    let mut data = ExtractionResult::default();

    if let Some(section) = company_section(text) {
        let lines: Vec<&str> = section
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if let Some(owner) = lines.first() {
            data.owner_name = owner.to_string();
        }
        if let Some(company) = lines.get(1) {
            data.company_name = company.to_string();
        }
        if lines.len() >= 4 {
            data.address = format!("{} {}", lines[2], lines[3]);
        }
    }

    data.nip = first_capture(&NIP_REGEX, text).unwrap_or_default();
    data.regon = first_capture(&REGON_REGEX, text).unwrap_or_default();
    data.krs = first_capture(&KRS_REGEX, text).unwrap_or_default();

    if let Some(m) = EMAIL_REGEX.find(text) {
        data.email = m.as_str().trim_end_matches('.').to_string();
    }
    if let Some(m) = PHONE_REGEX.find(text) {
        data.phone = m.as_str().trim().to_string();
    }
    if let Some(m) = BANK_ACCOUNT_REGEX.find(text) {
        data.bank_account = m.as_str().to_string();
    }

    data.entity_type = Some(classify_entity(text, &data));
    data
}

/// Text following the first company section heading, up to the next one
fn company_section(text: &str) -> Option<&str> {
    let (_, rest) = text.split_once(COMPANY_SECTION_MARKER)?;
    Some(rest.split(COMPANY_SECTION_MARKER).next().unwrap_or(rest))
}

fn classify_entity(text: &str, data: &ExtractionResult) -> EntityType {
    if text.to_lowercase().contains(LIMITED_COMPANY_MARKER) {
        EntityType::SpZoo
    } else if !data.nip.is_empty() && data.krs.is_empty() {
        EntityType::Jdg
    } else {
        EntityType::Other
    }
}

/// Extract reputation figures from the offer page text.
///
/// `offer_count` is the number of offer links found on the same page; it is
/// counted by the caller because it needs the live DOM.
pub fn extract_reputation(text: &str, offer_count: usize) -> ReputationMetrics {
    let mut data = ReputationMetrics::default();

    // first percentage that can actually be a recommendation rate
    data.recommendation_percent = PERCENT_REGEX
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<u8>().ok())
        .find(|p| *p <= 100)
        .unwrap_or(0);

    data.super_seller = text.contains(SUPER_SELLER_MARKER);
    data.years_on_allegro = years_active(text);
    data.total_offers = u32::try_from(offer_count).unwrap_or(u32::MAX);
    data.categories_count = text.matches(CATEGORY_MARKER).count() as u32;

    data.positive_count = first_number(&POSITIVE_REGEX, text).unwrap_or(0);
    data.negative_count = first_number(&NEGATIVE_REGEX, text).unwrap_or(0);
    data.neutral_count = first_number(&NEUTRAL_REGEX, text).unwrap_or(0);
    data.total_feedback = first_number(&TOTAL_FEEDBACK_REGEX, text).unwrap_or_else(|| {
        data.positive_count
            .saturating_add(data.negative_count)
            .saturating_add(data.neutral_count)
    });

    data
}

fn years_active(text: &str) -> u32 {
    if let Some(years) = first_number(&YEARS_SINCE_REGEX, text) {
        return years;
    }
    if let Some(years) = first_number(&YEARS_REGEX, text) {
        return years;
    }
    if text.contains("od roku") {
        return 1;
    }
    0
}

fn first_capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn first_number(regex: &Regex, text: &str) -> Option<u32> {
    first_capture(regex, text)?.parse().ok()
}
