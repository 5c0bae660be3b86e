use std::fmt::Display;

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Academic year a candidate is studying in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum Year {
    #[field(value = "second")]
    Second,
    #[field(value = "third")]
    Third,
    #[field(value = "last")]
    Last,
}

/// Department codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "UPPERCASE")]
pub enum Branch {
    #[field(value = "CSE")]
    Cse,
    #[field(value = "IT")]
    It,
    #[field(value = "ENTC")]
    Entc,
    #[field(value = "EE")]
    Ee,
    #[field(value = "MECH")]
    Mech,
    #[field(value = "CIVIL")]
    Civil,
    #[field(value = "CHEM")]
    Chem,
    #[field(value = "TEXTILE")]
    Textile,
    #[field(value = "PROD")]
    Prod,
    #[field(value = "INSTRU")]
    Instru,
}

/// The elected offices. Every candidate stands for exactly one.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, FromFormField,
)]
pub enum Position {
    #[serde(rename = "General Secretary")]
    #[field(value = "General Secretary")]
    GeneralSecretary,
    #[serde(rename = "Technical Secretary")]
    #[field(value = "Technical Secretary")]
    TechnicalSecretary,
    #[serde(rename = "Cultural Secretary")]
    #[field(value = "Cultural Secretary")]
    CulturalSecretary,
    #[serde(rename = "Sports Secretary")]
    #[field(value = "Sports Secretary")]
    SportsSecretary,
    #[serde(rename = "Ladies Representative")]
    #[field(value = "Ladies Representative")]
    LadiesRepresentative,
}

impl Position {
    /// Every position, in ballot order.
    pub const ALL: [Position; 5] = [
        Position::GeneralSecretary,
        Position::TechnicalSecretary,
        Position::CulturalSecretary,
        Position::SportsSecretary,
        Position::LadiesRepresentative,
    ];

    /// The human-readable office name, as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GeneralSecretary => "General Secretary",
            Self::TechnicalSecretary => "Technical Secretary",
            Self::CulturalSecretary => "Cultural Secretary",
            Self::SportsSecretary => "Sports Secretary",
            Self::LadiesRepresentative => "Ladies Representative",
        }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Moderation state of a candidate submission.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    /// Submitted, waiting for an admin.
    #[default]
    #[field(value = "pending")]
    Pending,
    /// Shown on the ballot and eligible for votes.
    #[field(value = "approved")]
    Approved,
    #[field(value = "rejected")]
    Rejected,
}

impl From<Year> for Bson {
    fn from(year: Year) -> Self {
        to_bson(&year).expect("Serialisation is infallible")
    }
}

impl From<Branch> for Bson {
    fn from(branch: Branch) -> Self {
        to_bson(&branch).expect("Serialisation is infallible")
    }
}

impl From<Position> for Bson {
    fn from(position: Position) -> Self {
        to_bson(&position).expect("Serialisation is infallible")
    }
}

impl From<CandidateStatus> for Bson {
    fn from(status: CandidateStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::serde_json;

    use super::*;

    #[test]
    fn positions_use_office_names_on_the_wire() {
        let json = serde_json::to_string(&Position::TechnicalSecretary).unwrap();
        assert_eq!("\"Technical Secretary\"", json);
        let parsed: Position = serde_json::from_str("\"Ladies Representative\"").unwrap();
        assert_eq!(Position::LadiesRepresentative, parsed);
        for position in Position::ALL {
            assert_eq!(Bson::String(position.name().to_string()), position.into());
        }
    }

    #[test]
    fn unknown_values_are_rejected_at_the_boundary() {
        assert!(serde_json::from_str::<Position>("\"President\"").is_err());
        assert!(serde_json::from_str::<Branch>("\"ARTS\"").is_err());
        assert!(serde_json::from_str::<Year>("\"first\"").is_err());
        assert!(serde_json::from_str::<CandidateStatus>("\"archived\"").is_err());
    }

    #[test]
    fn enum_wire_formats() {
        assert_eq!(Bson::String("ENTC".into()), Branch::Entc.into());
        assert_eq!(Bson::String("last".into()), Year::Last.into());
        assert_eq!(Bson::String("pending".into()), CandidateStatus::default().into());
    }
}
