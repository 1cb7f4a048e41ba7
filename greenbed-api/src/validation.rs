//! Validation Traits
//!
//! Request checks shared by the services. Everything here runs before the
//! transaction opens, so a malformed request never reaches the store.

use greenbed_core::{
    NewPlant, NewReading, NewSensor, PlantChanges, SensorChanges, SettingsChanges,
    MAX_UPDATE_INTERVAL, MIN_UPDATE_INTERVAL,
};

use crate::error::{ApiError, ApiResult};

/// Trait for validating non-empty strings.
pub trait ValidateNonEmpty {
    /// Validate that the value is non-empty.
    ///
    /// # Errors
    /// Returns `ApiError::missing_field` if the value is empty or whitespace-only.
    fn validate_non_empty(&self, field_name: &str) -> ApiResult<()>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field_name: &str) -> ApiResult<()> {
        if self.trim().is_empty() {
            return Err(ApiError::missing_field(field_name));
        }
        Ok(())
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field_name: &str) -> ApiResult<()> {
        self.as_str().validate_non_empty(field_name)
    }
}

/// Trait for validating numeric ranges.
pub trait ValidateRange {
    /// Validate that the value is positive (> 0).
    fn validate_positive(&self, field_name: &str) -> ApiResult<()>;

    /// Validate that the value is within an inclusive range.
    fn validate_range(&self, field_name: &str, min: Self, max: Self) -> ApiResult<()>
    where
        Self: Sized;
}

macro_rules! impl_validate_range {
    ($($t:ty),*) => {
        $(
            impl ValidateRange for $t {
                fn validate_positive(&self, field_name: &str) -> ApiResult<()> {
                    if *self <= 0 as $t {
                        return Err(ApiError::invalid_range(field_name, 1, <$t>::MAX));
                    }
                    Ok(())
                }

                fn validate_range(&self, field_name: &str, min: Self, max: Self) -> ApiResult<()> {
                    if *self < min || *self > max {
                        return Err(ApiError::invalid_range(field_name, min, max));
                    }
                    Ok(())
                }
            }
        )*
    };
}

impl_validate_range!(i32, i64, u32, u64);

impl ValidateRange for f64 {
    fn validate_positive(&self, field_name: &str) -> ApiResult<()> {
        self.validate_finite(field_name)?;
        if *self <= 0.0 {
            return Err(ApiError::invalid_range(field_name, "0 (exclusive)", f64::MAX));
        }
        Ok(())
    }

    fn validate_range(&self, field_name: &str, min: Self, max: Self) -> ApiResult<()> {
        self.validate_finite(field_name)?;
        if *self < min || *self > max {
            return Err(ApiError::invalid_range(field_name, min, max));
        }
        Ok(())
    }
}

/// NaN and infinities cannot be stored as REAL and are never meaningful
/// sensor values.
pub trait ValidateFinite {
    fn validate_finite(&self, field_name: &str) -> ApiResult<()>;
}

impl ValidateFinite for f64 {
    fn validate_finite(&self, field_name: &str) -> ApiResult<()> {
        if !self.is_finite() {
            return Err(ApiError::invalid_input(format!(
                "Field '{}' must be a finite number",
                field_name
            )));
        }
        Ok(())
    }
}

impl ValidateFinite for Option<f64> {
    fn validate_finite(&self, field_name: &str) -> ApiResult<()> {
        match self {
            Some(value) => value.validate_finite(field_name),
            None => Ok(()),
        }
    }
}

/// Trait for checking if an update request has any fields set.
pub trait HasUpdates {
    /// Check if any update fields are set.
    fn has_any_updates(&self) -> bool;

    /// Validate that at least one update field is set.
    fn validate_has_updates(&self) -> ApiResult<()> {
        if !self.has_any_updates() {
            return Err(ApiError::invalid_input(
                "At least one field must be provided for update",
            ));
        }
        Ok(())
    }
}

impl HasUpdates for SensorChanges {
    fn has_any_updates(&self) -> bool {
        self.name.is_some()
            || self.plant_id.is_some()
            || self.description.is_some()
            || self.location.is_some()
            || self.status.is_some()
            || self.plot_type.is_some()
    }
}

impl HasUpdates for PlantChanges {
    fn has_any_updates(&self) -> bool {
        self.name.is_some()
            || self.species.is_some()
            || self.min_soil_moisture.is_some()
            || self.max_soil_moisture.is_some()
            || self.watering_frequency.is_some()
    }
}

impl HasUpdates for SettingsChanges {
    fn has_any_updates(&self) -> bool {
        self.email_notifications.is_some()
            || self.low_battery_alerts.is_some()
            || self.moisture_alerts.is_some()
            || self.temperature_alerts.is_some()
            || self.update_interval.is_some()
            || self.theme.is_some()
            || self.language.is_some()
            || self.timezone.is_some()
    }
}

// ============================================================================
// PAYLOAD VALIDATION
// ============================================================================

/// Checks run on a payload before any store access.
pub trait ValidatePayload {
    fn validate(&self) -> ApiResult<()>;
}

fn validate_moisture_bounds(min: Option<f64>, max: Option<f64>) -> ApiResult<()> {
    if let Some(min) = min {
        min.validate_range("min_soil_moisture", 0.0, 100.0)?;
    }
    if let Some(max) = max {
        max.validate_range("max_soil_moisture", 0.0, 100.0)?;
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ApiError::validation_failed(
                "min_soil_moisture must not exceed max_soil_moisture",
            ));
        }
    }
    Ok(())
}

impl ValidatePayload for NewSensor {
    fn validate(&self) -> ApiResult<()> {
        self.name.validate_non_empty("name")?;
        if let Some(plant_id) = self.plant_id {
            plant_id.validate_positive("plant_id")?;
        }
        Ok(())
    }
}

impl ValidatePayload for SensorChanges {
    fn validate(&self) -> ApiResult<()> {
        self.validate_has_updates()?;
        if let Some(name) = &self.name {
            name.validate_non_empty("name")?;
        }
        if let Some(plant_id) = self.plant_id {
            plant_id.validate_positive("plant_id")?;
        }
        Ok(())
    }
}

impl ValidatePayload for NewPlant {
    fn validate(&self) -> ApiResult<()> {
        self.name.validate_non_empty("name")?;
        validate_moisture_bounds(self.min_soil_moisture, self.max_soil_moisture)?;
        if let Some(hours) = self.watering_frequency {
            hours.validate_positive("watering_frequency")?;
        }
        Ok(())
    }
}

impl ValidatePayload for PlantChanges {
    fn validate(&self) -> ApiResult<()> {
        self.validate_has_updates()?;
        if let Some(name) = &self.name {
            name.validate_non_empty("name")?;
        }
        validate_moisture_bounds(self.min_soil_moisture, self.max_soil_moisture)?;
        if let Some(hours) = self.watering_frequency {
            hours.validate_positive("watering_frequency")?;
        }
        Ok(())
    }
}

impl ValidatePayload for NewReading {
    fn validate(&self) -> ApiResult<()> {
        self.reading.validate_finite("reading")?;
        self.temperature.validate_finite("temperature")?;
        if let Some(humidity) = self.humidity {
            humidity.validate_range("humidity", 0.0, 100.0)?;
        }
        Ok(())
    }
}

impl ValidatePayload for SettingsChanges {
    fn validate(&self) -> ApiResult<()> {
        self.validate_has_updates()?;
        if let Some(interval) = self.update_interval {
            interval.validate_range("update_interval", MIN_UPDATE_INTERVAL, MAX_UPDATE_INTERVAL)?;
        }
        if let Some(language) = &self.language {
            language.validate_non_empty("language")?;
        }
        if let Some(timezone) = &self.timezone {
            timezone.validate_non_empty("timezone")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_validate_non_empty_str() {
        assert!("hello".validate_non_empty("test").is_ok());
        assert!("".validate_non_empty("test").is_err());
        assert!("   ".validate_non_empty("test").is_err());
        assert!("  hi  ".validate_non_empty("test").is_ok());
    }

    #[test]
    fn test_validate_range() {
        assert!(60i64.validate_range("update_interval", 60, 3600).is_ok());
        assert!(3600i64.validate_range("update_interval", 60, 3600).is_ok());
        assert!(59i64.validate_range("update_interval", 60, 3600).is_err());
        assert!(3601i64.validate_range("update_interval", 60, 3600).is_err());
        assert!(0i64.validate_positive("id").is_err());
    }

    #[test]
    fn test_float_checks_reject_nan() {
        assert!(f64::NAN.validate_finite("reading").is_err());
        assert!(f64::INFINITY.validate_range("humidity", 0.0, 100.0).is_err());
        assert!(Some(21.5).validate_finite("temperature").is_ok());
        assert!(None::<f64>.validate_finite("temperature").is_ok());
    }

    #[test]
    fn test_empty_changes_are_rejected() {
        let err = SensorChanges::default().validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(PlantChanges::default().validate().is_err());
        assert!(SettingsChanges::default().validate().is_err());
    }

    #[test]
    fn test_plant_moisture_bounds() {
        let mut plant = NewPlant::named("basil");
        plant.min_soil_moisture = Some(30.0);
        plant.max_soil_moisture = Some(70.0);
        assert!(plant.validate().is_ok());

        plant.max_soil_moisture = Some(120.0);
        assert_eq!(plant.validate().unwrap_err().code, ErrorCode::InvalidRange);

        plant.max_soil_moisture = Some(20.0);
        assert_eq!(
            plant.validate().unwrap_err().code,
            ErrorCode::ValidationFailed
        );
    }

    #[test]
    fn test_settings_interval_bounds() {
        let changes = SettingsChanges {
            update_interval: Some(30),
            ..Default::default()
        };
        assert_eq!(changes.validate().unwrap_err().code, ErrorCode::InvalidRange);

        let changes = SettingsChanges {
            timezone: Some(" ".to_string()),
            ..Default::default()
        };
        assert_eq!(changes.validate().unwrap_err().code, ErrorCode::MissingField);
    }
}
