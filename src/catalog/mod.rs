//! # Service Catalog
//!
//! Static catalog of services and plans offered by the broker. Plans carry the
//! RDS properties used to provision dedicated instances, or mark the plan as
//! shared (one database per tenant on a long-lived engine).

pub mod plan;

pub use plan::{Cost, Engine, RdsProperties, ServicePlan, ServicePlanMetadata};

use crate::errors::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    #[serde(default, rename = "displayName", alias = "displayname", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, rename = "imageUrl", alias = "imageurl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, rename = "longDescription", alias = "longdescription", skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, rename = "providerDisplayName", alias = "providerdisplayname", skip_serializing_if = "Option::is_none")]
    pub provider_display_name: Option<String>,
    #[serde(default, rename = "documentationUrl", alias = "documentationurl", skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default, rename = "supportUrl", alias = "supporturl", skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardClient {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub redirect_uri: String,
}

/// A catalog service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Service {
    #[validate(length(min = 1, message = "Must provide a non-empty ID"))]
    pub id: String,

    #[validate(length(min = 1, message = "Must provide a non-empty Name"))]
    pub name: String,

    #[validate(length(min = 1, message = "Must provide a non-empty Description"))]
    pub description: String,

    #[serde(default)]
    pub bindable: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ServiceMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    #[serde(default)]
    pub plan_updateable: bool,

    #[serde(default)]
    pub plans: Vec<ServicePlan>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_client: Option<DashboardClient>,
}

impl Catalog {
    /// Validate every service and plan in the catalog
    pub fn validate(&self) -> Result<()> {
        for service in &self.services {
            service.validate().map_err(|e| {
                BrokerError::validation(format!("Validating Services configuration: {}", e))
            })?;
        }

        Ok(())
    }

    /// Look up a service by exact ID
    pub fn find_service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.id == service_id)
    }

    /// Look up a plan by exact service and plan ID
    pub fn find_service_plan(&self, service_id: &str, plan_id: &str) -> Option<&ServicePlan> {
        self.find_service(service_id)?.plans.iter().find(|plan| plan.id == plan_id)
    }
}

impl Service {
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| {
            BrokerError::validation(format!("Service '{}': {}", self.id, BrokerError::from(e)))
        })?;

        for plan in &self.plans {
            plan.validate().map_err(|e| {
                BrokerError::validation(format!("Validating Plans configuration: {}", e))
            })?;

            if self.plan_updateable && plan.is_shared() {
                return Err(BrokerError::validation(format!(
                    "Cannot have an updateable service with shared plans (service '{}')",
                    self.id
                )));
            }
        }

        Ok(())
    }
}

/// Decide whether an instance may move from `old_plan` to `new_plan`.
///
/// This only catches the obviously bad combinations: a plan change across the
/// shared/dedicated boundary or across engines. Some transitions it rejects
/// would be safe; it is intentionally not a full compatibility check.
pub fn can_update(old_plan: &ServicePlan, new_plan: &ServicePlan, service: &Service) -> bool {
    if !service.plan_updateable {
        return false;
    }

    if old_plan.id != new_plan.id {
        if old_plan.rds_properties.shared != new_plan.rds_properties.shared {
            return false;
        }
        match (old_plan.engine(), new_plan.engine()) {
            (Ok(old_engine), Ok(new_engine)) if old_engine == new_engine => {}
            _ => return false,
        }
    }

    true
}
