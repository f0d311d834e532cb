//! Vendor application form schema
//!
//! Each vendor type submits its own explicitly typed field set. Submissions
//! are validated against the schema before they are hashed, so the content
//! hash is always computed over a canonical, schema-checked structure.

use serde::{Deserialize, Serialize};

use super::VendorType;

/// Fields shared by every vendor type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonFields {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideFields {
    #[serde(flatten)]
    pub common: CommonFields,
    pub experience: String,
    pub specialization: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub certifications: String,
    pub emergency_contact: String,
    /// Document-store pointer to the guide's photograph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccommodationFields {
    #[serde(flatten)]
    pub common: CommonFields,
    pub property_name: String,
    pub property_type: String,
    pub gst_number: String,
    #[serde(default)]
    pub room_count: u32,
    #[serde(default)]
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestaurantFields {
    #[serde(flatten)]
    pub common: CommonFields,
    pub restaurant_name: String,
    pub gst_number: String,
    pub food_license_number: String,
    #[serde(default)]
    pub cuisine_types: Vec<String>,
    #[serde(default)]
    pub seating_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFields {
    #[serde(flatten)]
    pub common: CommonFields,
    pub license_number: String,
    pub vehicle_type: String,
    pub vehicle_registration: String,
    #[serde(default)]
    pub seating_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFields {
    #[serde(flatten)]
    pub common: CommonFields,
    pub business_name: String,
    pub registration_number: String,
    #[serde(default)]
    pub activity_kinds: Vec<String>,
    #[serde(default)]
    pub safety_certification: String,
}

/// Schema-checked application payload, tagged by vendor type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vendor_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationFields {
    Guide(GuideFields),
    Accommodation(AccommodationFields),
    FoodRestaurant(RestaurantFields),
    Transportation(TransportFields),
    Activity(ActivityFields),
}

/// Vendor-specific line printed on the certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CertificateDetail {
    PhotoRef(Option<String>),
    LicenseNumber(String),
    RegistrationNumber(String),
}

impl ApplicationFields {
    pub fn vendor_type(&self) -> VendorType {
        match self {
            ApplicationFields::Guide(_) => VendorType::Guide,
            ApplicationFields::Accommodation(_) => VendorType::Accommodation,
            ApplicationFields::FoodRestaurant(_) => VendorType::FoodRestaurant,
            ApplicationFields::Transportation(_) => VendorType::Transportation,
            ApplicationFields::Activity(_) => VendorType::Activity,
        }
    }

    pub fn common(&self) -> &CommonFields {
        match self {
            ApplicationFields::Guide(f) => &f.common,
            ApplicationFields::Accommodation(f) => &f.common,
            ApplicationFields::FoodRestaurant(f) => &f.common,
            ApplicationFields::Transportation(f) => &f.common,
            ApplicationFields::Activity(f) => &f.common,
        }
    }

    /// Names of required fields that are empty after trimming.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let common = self.common();
        let mut required: Vec<(&'static str, &str)> = vec![
            ("full_name", &common.full_name),
            ("email", &common.email),
            ("phone", &common.phone),
            ("address", &common.address),
            ("city", &common.city),
        ];

        match self {
            ApplicationFields::Guide(f) => {
                required.push(("experience", &f.experience));
                required.push(("specialization", &f.specialization));
                required.push(("emergency_contact", &f.emergency_contact));
                required.push(("description", &common.description));
            }
            ApplicationFields::Accommodation(f) => {
                required.push(("property_name", &f.property_name));
                required.push(("property_type", &f.property_type));
                required.push(("gst_number", &f.gst_number));
            }
            ApplicationFields::FoodRestaurant(f) => {
                required.push(("restaurant_name", &f.restaurant_name));
                required.push(("gst_number", &f.gst_number));
                required.push(("food_license_number", &f.food_license_number));
            }
            ApplicationFields::Transportation(f) => {
                required.push(("license_number", &f.license_number));
                required.push(("vehicle_type", &f.vehicle_type));
                required.push(("vehicle_registration", &f.vehicle_registration));
            }
            ApplicationFields::Activity(f) => {
                required.push(("business_name", &f.business_name));
                required.push(("registration_number", &f.registration_number));
            }
        }

        required
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    /// The vendor-type-specific field shown on the certificate.
    pub fn certificate_detail(&self) -> CertificateDetail {
        match self {
            ApplicationFields::Guide(f) => CertificateDetail::PhotoRef(f.photo_ref.clone()),
            ApplicationFields::Transportation(f) => {
                CertificateDetail::LicenseNumber(f.license_number.trim().to_string())
            }
            ApplicationFields::Accommodation(f) => {
                CertificateDetail::RegistrationNumber(f.gst_number.trim().to_string())
            }
            ApplicationFields::FoodRestaurant(f) => {
                CertificateDetail::RegistrationNumber(f.gst_number.trim().to_string())
            }
            ApplicationFields::Activity(f) => {
                CertificateDetail::RegistrationNumber(f.registration_number.trim().to_string())
            }
        }
    }
}
