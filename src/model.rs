use serde::{Deserialize, Serialize};

/// One apartment offering as published on the listings page.
///
/// `id` is the site's own identifier for the unit. Numeric attributes are
/// `None` when the page did not carry them; the filter rejects such listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub address: Option<String>,
    pub url: Option<String>,
    pub cold_rent: Option<f64>,
    pub rooms: Option<f64>,
    pub area: Option<f64>,
    pub extra_costs: Option<String>,
    pub wbs: Option<String>,
    pub image_url: Option<String>,
}

impl Listing {
    /// Bare listing with only an identifier and a title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            address: None,
            url: None,
            cold_rent: None,
            rooms: None,
            area: None,
            extra_costs: None,
            wbs: None,
            image_url: None,
        }
    }
}

/// Search bounds applied to every extracted listing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub max_cold_rent: f64,
    pub min_rooms: f64,
    pub max_rooms: f64,
    pub max_area: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationMethod {
    Email,
    #[serde(alias = "ntfy")]
    Push,
}

impl NotificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationMethod::Email => "email",
            NotificationMethod::Push => "push",
        }
    }

    pub fn parse_method(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Some(NotificationMethod::Email),
            "push" | "ntfy" => Some(NotificationMethod::Push),
            _ => None,
        }
    }
}
