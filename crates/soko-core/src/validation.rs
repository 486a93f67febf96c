//! # Validation Module
//!
//! Pure input validators shared by the engine.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (HTTP/CRUD collaborators)                             │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - field-shape validation                         │
//! │  ├── Quantity shape and bounds                                         │
//! │  ├── Address structural completeness                                   │
//! │  └── Country-specific phone/postal formats                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints (stock_level >= 0, quantity > 0)                │
//! │  └── Guarded conditional UPDATEs                                       │
//! │                                                                         │
//! │  Defense in depth: Multiple layers catch different errors              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{ValidationError, ValidationResult};
use crate::types::Address;
use crate::MAX_ITEM_QUANTITY;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a reservation/checkout quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use soko_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Address Validators
// =============================================================================

/// Returns the names of structurally required address fields that are
/// missing or blank.
///
/// An empty result means the address is structurally complete. Format
/// checks (phone, postal code) are separate - see below.
pub fn missing_address_fields(address: &Address) -> Vec<&'static str> {
    let mut missing = Vec::new();

    if address.full_name.trim().is_empty() {
        missing.push("full_name");
    }
    if address.line1.trim().is_empty() {
        missing.push("line1");
    }
    if address.city.trim().is_empty() {
        missing.push("city");
    }
    if address.region.trim().is_empty() {
        missing.push("region");
    }
    if address.postal_code.trim().is_empty() {
        missing.push("postal_code");
    }
    if address.country.trim().is_empty() {
        missing.push("country");
    }
    if address.phone.trim().is_empty() {
        missing.push("phone");
    }

    missing
}

// =============================================================================
// Country Format Validators
// =============================================================================

/// Checks a phone number against its country's known format.
///
/// ## Returns
/// * `Some(true)` - country format known, number matches
/// * `Some(false)` - country format known, number does NOT match
/// * `None` - no format on file for this country (no opinion)
///
/// ## Known Formats
/// - KE: `+2547XXXXXXXX`, `+2541XXXXXXXX`, `07XXXXXXXX`, `01XXXXXXXX`
/// - US: 10 digits, optional leading `+1`
pub fn phone_matches_country(phone: &str, country: &str) -> Option<bool> {
    let digits: String = phone
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    match country.to_ascii_uppercase().as_str() {
        "KE" => {
            let national = if let Some(rest) = digits.strip_prefix("+254") {
                format!("0{}", rest)
            } else {
                digits
            };
            let ok = national.len() == 10
                && (national.starts_with("07") || national.starts_with("01"))
                && national.chars().all(|c| c.is_ascii_digit());
            Some(ok)
        }
        "US" => {
            let national = digits.strip_prefix("+1").unwrap_or(&digits);
            let ok = national.len() == 10 && national.chars().all(|c| c.is_ascii_digit());
            Some(ok)
        }
        _ => None,
    }
}

/// Checks a postal code against its country's known format.
///
/// Same tri-state contract as [`phone_matches_country`].
///
/// ## Known Formats
/// - KE: 5 digits
/// - US: ZIP (5 digits) or ZIP+4 (`12345-6789`)
pub fn postal_matches_country(postal: &str, country: &str) -> Option<bool> {
    let postal = postal.trim();

    match country.to_ascii_uppercase().as_str() {
        "KE" => Some(postal.len() == 5 && postal.chars().all(|c| c.is_ascii_digit())),
        "US" => {
            let ok = match postal.split_once('-') {
                Some((zip, plus4)) => {
                    zip.len() == 5
                        && plus4.len() == 4
                        && zip.chars().all(|c| c.is_ascii_digit())
                        && plus4.chars().all(|c| c.is_ascii_digit())
                }
                None => postal.len() == 5 && postal.chars().all(|c| c.is_ascii_digit()),
            };
            Some(ok)
        }
        _ => None,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            id: "a1".to_string(),
            full_name: "Wanjiku Kamau".to_string(),
            line1: "Moi Avenue 12".to_string(),
            line2: None,
            city: "Nairobi".to_string(),
            region: "Nairobi".to_string(),
            postal_code: "00100".to_string(),
            country: "KE".to_string(),
            phone: "0712345678".to_string(),
        }
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_missing_address_fields() {
        assert!(missing_address_fields(&address()).is_empty());

        let mut incomplete = address();
        incomplete.city = "  ".to_string();
        incomplete.phone = String::new();
        assert_eq!(missing_address_fields(&incomplete), vec!["city", "phone"]);
    }

    #[test]
    fn test_kenyan_phone_formats() {
        assert_eq!(phone_matches_country("0712345678", "KE"), Some(true));
        assert_eq!(phone_matches_country("+254712345678", "KE"), Some(true));
        assert_eq!(phone_matches_country("0112345678", "KE"), Some(true));

        assert_eq!(phone_matches_country("0812345678", "KE"), Some(false));
        assert_eq!(phone_matches_country("071234567", "KE"), Some(false));
    }

    #[test]
    fn test_us_phone_formats() {
        assert_eq!(phone_matches_country("+1 212 555 0147", "US"), Some(true));
        assert_eq!(phone_matches_country("2125550147", "US"), Some(true));
        assert_eq!(phone_matches_country("55501", "US"), Some(false));
    }

    #[test]
    fn test_unknown_country_has_no_opinion() {
        assert_eq!(phone_matches_country("12345", "ZZ"), None);
        assert_eq!(postal_matches_country("12345", "ZZ"), None);
    }

    #[test]
    fn test_postal_formats() {
        assert_eq!(postal_matches_country("00100", "KE"), Some(true));
        assert_eq!(postal_matches_country("0010", "KE"), Some(false));
        assert_eq!(postal_matches_country("12345-6789", "US"), Some(true));
        assert_eq!(postal_matches_country("1234", "US"), Some(false));
    }
}
