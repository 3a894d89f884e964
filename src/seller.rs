use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the identifier column in the input and output datasets
pub const LOGIN_COLUMN: &str = "login";

/// Enrichment columns appended after the input columns, in output order
pub const ENRICHMENT_COLUMNS: &[&str] = &[
    "owner_name",
    "company_name",
    "address",
    "nip",
    "regon",
    "krs",
    "email",
    "phone",
    "bank_account",
    "entity_type",
    "recommendation_percent",
    "positive_count",
    "negative_count",
    "neutral_count",
    "total_feedback",
    "super_seller",
    "years_on_allegro",
    "total_offers",
    "categories_count",
    "seller_score",
    "segment",
];

/// Build the output header: input columns followed by every enrichment
/// column the input does not already carry.
pub fn output_schema(input_columns: &[String]) -> Vec<String> {
    let mut schema = input_columns.to_vec();
    for column in ENRICHMENT_COLUMNS {
        if !schema.iter().any(|c| c == column) {
            schema.push((*column).to_string());
        }
    }
    schema
}

/// One seller to process, carrying its input row untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    login: String,
    /// Input row as (column, value) pairs in input column order
    fields: Vec<(String, String)>,
}

impl WorkItem {
    pub fn new(login: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self { login: login.into(), fields }
    }

    /// Work item with only a login column (tests, ad-hoc runs)
    pub fn from_login(login: impl Into<String>) -> Self {
        let login = login.into();
        let fields = vec![(LOGIN_COLUMN.to_string(), login.clone())];
        Self { login, fields }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    /// Value of a seed column, if the input row has it
    pub fn seed(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

/// Legal form classification derived from the company section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    /// Limited liability company
    SpZoo,
    /// Sole proprietorship: has a tax id but no court register number
    Jdg,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::SpZoo => "SP. Z O.O.",
            EntityType::Jdg => "JDG",
            EntityType::Other => "INNY",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business identity fields read from the seller information text.
/// Absent fields stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub owner_name: String,
    pub company_name: String,
    pub address: String,
    pub nip: String,
    pub regon: String,
    pub krs: String,
    pub email: String,
    pub phone: String,
    pub bank_account: String,
    pub entity_type: Option<EntityType>,
}

impl ExtractionResult {
    pub fn has_registry_id(&self) -> bool {
        !self.nip.is_empty() || !self.regon.is_empty() || !self.krs.is_empty()
    }
}

/// Reputation figures read from the offer page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationMetrics {
    pub recommendation_percent: u8,
    pub positive_count: u32,
    pub negative_count: u32,
    pub neutral_count: u32,
    pub total_feedback: u32,
    pub super_seller: bool,
    pub years_on_allegro: u32,
    pub total_offers: u32,
    pub categories_count: u32,
}

/// Ordinal quality bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    A,
    B,
    C,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Segment::A => "A",
            Segment::B => "B",
            Segment::C => "C",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u32,
    pub segment: Segment,
}

/// A work item merged with everything learned about it
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub item: WorkItem,
    pub company: ExtractionResult,
    pub reputation: ReputationMetrics,
    pub score: ScoreResult,
}

impl EnrichedRecord {
    pub fn new(
        item: WorkItem,
        company: ExtractionResult,
        reputation: ReputationMetrics,
        score: ScoreResult,
    ) -> Self {
        Self { item, company, reputation, score }
    }

    pub fn login(&self) -> &str {
        self.item.login()
    }

    /// Enrichment value for a column, `None` if the column is not an enrichment column
    fn enrichment_value(&self, column: &str) -> Option<String> {
        let c = &self.company;
        let r = &self.reputation;
        let value = match column {
            "owner_name" => c.owner_name.clone(),
            "company_name" => c.company_name.clone(),
            "address" => c.address.clone(),
            "nip" => c.nip.clone(),
            "regon" => c.regon.clone(),
            "krs" => c.krs.clone(),
            "email" => c.email.clone(),
            "phone" => c.phone.clone(),
            "bank_account" => c.bank_account.clone(),
            "entity_type" => c.entity_type.map(|e| e.to_string()).unwrap_or_default(),
            "recommendation_percent" => r.recommendation_percent.to_string(),
            "positive_count" => r.positive_count.to_string(),
            "negative_count" => r.negative_count.to_string(),
            "neutral_count" => r.neutral_count.to_string(),
            "total_feedback" => r.total_feedback.to_string(),
            "super_seller" => r.super_seller.to_string(),
            "years_on_allegro" => r.years_on_allegro.to_string(),
            "total_offers" => r.total_offers.to_string(),
            "categories_count" => r.categories_count.to_string(),
            "seller_score" => self.score.score.to_string(),
            "segment" => self.score.segment.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Value written under `column`. Enrichment columns always carry the
    /// extracted value, even when empty, so a seed `nip` can never make an
    /// unenriched row look complete. Other columns repeat the input row.
    pub fn value(&self, column: &str) -> String {
        self.enrichment_value(column)
            .or_else(|| self.item.seed(column).map(str::to_string))
            .unwrap_or_default()
    }

    /// Row values in schema order; unknown columns are written empty
    pub fn to_row(&self, schema: &[String]) -> Vec<String> {
        schema.iter().map(|column| self.value(column)).collect()
    }
}
