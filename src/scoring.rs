//! Seller quality score and segment
//!
//! The score is a sum of fixed weights over boolean conditions; the segment
//! is a threshold bucket of the score.

use crate::seller::{EntityType, ExtractionResult, ReputationMetrics, ScoreResult, Segment};

pub const SUPER_SELLER_POINTS: u32 = 30;
pub const TOP_RECOMMENDATION_POINTS: u32 = 20;
pub const LARGE_CATALOGUE_POINTS: u32 = 15;
pub const VETERAN_POINTS: u32 = 10;
pub const LIMITED_COMPANY_POINTS: u32 = 10;
pub const EMAIL_POINTS: u32 = 10;

pub const TOP_RECOMMENDATION_PERCENT: u8 = 99;
pub const LARGE_CATALOGUE_OFFERS: u32 = 200;
pub const VETERAN_YEARS: u32 = 5;

pub const SEGMENT_A_THRESHOLD: u32 = 75;
pub const SEGMENT_B_THRESHOLD: u32 = 50;

/// Score a seller from its extracted company data and reputation
pub fn score(company: &ExtractionResult, reputation: &ReputationMetrics) -> ScoreResult {
    let conditions = [
        (reputation.super_seller, SUPER_SELLER_POINTS),
        (reputation.recommendation_percent >= TOP_RECOMMENDATION_PERCENT, TOP_RECOMMENDATION_POINTS),
        (reputation.total_offers >= LARGE_CATALOGUE_OFFERS, LARGE_CATALOGUE_POINTS),
        (reputation.years_on_allegro >= VETERAN_YEARS, VETERAN_POINTS),
        (company.entity_type == Some(EntityType::SpZoo), LIMITED_COMPANY_POINTS),
        (!company.email.is_empty(), EMAIL_POINTS),
    ];

    let score: u32 = conditions
        .iter()
        .filter(|(met, _)| *met)
        .map(|(_, points)| points)
        .sum();

    ScoreResult { score, segment: segment_for(score) }
}

pub fn segment_for(score: u32) -> Segment {
    if score >= SEGMENT_A_THRESHOLD {
        Segment::A
    } else if score >= SEGMENT_B_THRESHOLD {
        Segment::B
    } else {
        Segment::C
    }
}
