//! Translation of catalog plans and caller parameters into cloud resource
//! settings.
//!
//! Precedence is plan defaults, then caller parameters. For cluster-style
//! engines, storage, networking and backup settings belong to the cluster and
//! are left off the instance.

use super::parameters::{ProvisionDetails, ProvisionParameters, UpdateDetails, UpdateParameters};
use crate::catalog::{RdsProperties, ServicePlan};
use crate::cloud::{DbClusterDetails, DbInstanceDetails, MasterPassword};
use crate::domain::Instance;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

const OWNER_TAG_VALUE: &str = "Cloud Foundry";
const BROKER_TAG_VALUE: &str = "AWS RDS Service Broker";

/// Cloud identifier of the instance (and cluster) backing a registry instance
pub fn resource_identifier(db_prefix: &str, instance_id: &str) -> String {
    format!("{}-{}", db_prefix, instance_id.replace('_', "-"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagAction {
    Created,
    Updated,
}

impl TagAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
        }
    }
}

/// Who a resource belongs to, for tagging
#[derive(Debug, Clone, Copy, Default)]
pub struct TagContext<'a> {
    pub service_id: &'a str,
    pub plan_id: &'a str,
    pub organization_id: &'a str,
    pub space_id: &'a str,
}

/// Tags attached to every created or modified resource
pub fn resource_tags(action: TagAction, context: TagContext<'_>, at: DateTime<Utc>) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("Owner".to_string(), OWNER_TAG_VALUE.to_string());
    tags.insert(format!("{} by", action.as_str()), BROKER_TAG_VALUE.to_string());
    tags.insert(format!("{} at", action.as_str()), at.to_rfc2822());

    for (key, value) in [
        ("Service ID", context.service_id),
        ("Plan ID", context.plan_id),
        ("Organization ID", context.organization_id),
        ("Space ID", context.space_id),
    ] {
        if !value.is_empty() {
            tags.insert(key.to_string(), value.to_string());
        }
    }
    tags
}

fn text(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn positive(value: i64) -> Option<i64> {
    (value > 0).then_some(value)
}

fn override_text(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        *target = Some(value.to_string());
    }
}

fn override_retention(target: &mut Option<i64>, value: Option<i64>) {
    if let Some(value) = value.filter(|v| *v > 0) {
        *target = Some(value);
    }
}

fn cluster_from_plan(properties: &RdsProperties) -> DbClusterDetails {
    DbClusterDetails {
        engine: text(&properties.engine),
        engine_version: text(&properties.engine_version),
        availability_zones: text(&properties.availability_zone).into_iter().collect(),
        backup_retention_period: positive(properties.backup_retention_period),
        db_cluster_parameter_group_name: text(&properties.db_cluster_parameter_group_name),
        db_subnet_group_name: text(&properties.db_subnet_group_name),
        port: positive(properties.port),
        preferred_backup_window: text(&properties.preferred_backup_window),
        preferred_maintenance_window: text(&properties.preferred_maintenance_window),
        vpc_security_group_ids: properties.vpc_security_group_ids.clone(),
        ..Default::default()
    }
}

fn instance_from_plan(properties: &RdsProperties) -> DbInstanceDetails {
    let mut details = DbInstanceDetails {
        db_instance_class: text(&properties.db_instance_class),
        engine: text(&properties.engine),
        engine_version: text(&properties.engine_version),
        auto_minor_version_upgrade: properties.auto_minor_version_upgrade,
        availability_zone: text(&properties.availability_zone),
        copy_tags_to_snapshot: properties.copy_tags_to_snapshot,
        db_parameter_group_name: text(&properties.db_parameter_group_name),
        db_subnet_group_name: text(&properties.db_subnet_group_name),
        option_group_name: text(&properties.option_group_name),
        preferred_maintenance_window: text(&properties.preferred_maintenance_window),
        publicly_accessible: properties.publicly_accessible,
        ..Default::default()
    };

    if !properties.is_cluster_style() {
        details.allocated_storage = positive(properties.allocated_storage);
        details.backup_retention_period = positive(properties.backup_retention_period);
        details.character_set_name = text(&properties.character_set_name);
        details.db_security_groups = properties.db_security_groups.clone();
        details.iops = positive(properties.iops);
        details.kms_key_id = text(&properties.kms_key_id);
        details.license_model = text(&properties.license_model);
        details.multi_az = properties.multi_az;
        details.port = positive(properties.port);
        details.preferred_backup_window = text(&properties.preferred_backup_window);
        details.storage_encrypted = properties.storage_encrypted;
        details.storage_type = text(&properties.storage_type);
        details.vpc_security_group_ids = properties.vpc_security_group_ids.clone();
    }

    details
}

/// Cluster settings for provisioning a cluster-style instance
pub fn create_cluster_details(
    instance: &Instance,
    master_username: &str,
    master_password: &str,
    plan: &ServicePlan,
    parameters: &ProvisionParameters,
    request: &ProvisionDetails,
) -> DbClusterDetails {
    let mut details = cluster_from_plan(&plan.rds_properties);
    details.database_name = Some(instance.db_name.clone());
    details.master_username = Some(master_username.to_string());
    details.master_user_password = Some(MasterPassword::new(master_password));

    override_retention(&mut details.backup_retention_period, parameters.backup_retention_period);
    override_text(&mut details.preferred_backup_window, &parameters.preferred_backup_window);
    override_text(&mut details.preferred_maintenance_window, &parameters.preferred_maintenance_window);

    details.tags = resource_tags(
        TagAction::Created,
        TagContext {
            service_id: &request.service_id,
            plan_id: &request.plan_id,
            organization_id: &request.organization_guid,
            space_id: &request.space_guid,
        },
        Utc::now(),
    );
    details
}

/// Cluster settings for an update to a cluster-style instance
pub fn modify_cluster_details(
    plan: &ServicePlan,
    parameters: &UpdateParameters,
    request: &UpdateDetails,
) -> DbClusterDetails {
    let mut details = cluster_from_plan(&plan.rds_properties);

    override_retention(&mut details.backup_retention_period, parameters.backup_retention_period);
    override_text(&mut details.preferred_backup_window, &parameters.preferred_backup_window);
    override_text(&mut details.preferred_maintenance_window, &parameters.preferred_maintenance_window);

    details.tags = resource_tags(
        TagAction::Updated,
        TagContext { service_id: &request.service_id, plan_id: &request.plan_id, ..Default::default() },
        Utc::now(),
    );
    details
}

/// Instance settings for provisioning.
///
/// Cluster-style instances join the cluster named `cluster_identifier`;
/// others carry their own database name and master credentials.
pub fn create_instance_details(
    instance: &Instance,
    master_username: &str,
    master_password: &str,
    cluster_identifier: &str,
    plan: &ServicePlan,
    parameters: &ProvisionParameters,
    request: &ProvisionDetails,
) -> DbInstanceDetails {
    let mut details = instance_from_plan(&plan.rds_properties);

    if plan.rds_properties.is_cluster_style() {
        details.db_cluster_identifier = Some(cluster_identifier.to_string());
    } else {
        details.db_name = Some(instance.db_name.clone());
        details.master_username = Some(master_username.to_string());
        details.master_user_password = Some(MasterPassword::new(master_password));

        override_retention(&mut details.backup_retention_period, parameters.backup_retention_period);
        override_text(&mut details.character_set_name, &parameters.character_set_name);
        override_text(&mut details.preferred_backup_window, &parameters.preferred_backup_window);
    }
    override_text(&mut details.preferred_maintenance_window, &parameters.preferred_maintenance_window);

    details.tags = resource_tags(
        TagAction::Created,
        TagContext {
            service_id: &request.service_id,
            plan_id: &request.plan_id,
            organization_id: &request.organization_guid,
            space_id: &request.space_guid,
        },
        Utc::now(),
    );
    details
}

/// Instance settings for an update
pub fn modify_instance_details(
    plan: &ServicePlan,
    parameters: &UpdateParameters,
    request: &UpdateDetails,
) -> DbInstanceDetails {
    let mut details = instance_from_plan(&plan.rds_properties);

    if !plan.rds_properties.is_cluster_style() {
        override_retention(&mut details.backup_retention_period, parameters.backup_retention_period);
        override_text(&mut details.preferred_backup_window, &parameters.preferred_backup_window);
    }
    override_text(&mut details.preferred_maintenance_window, &parameters.preferred_maintenance_window);

    details.tags = resource_tags(
        TagAction::Updated,
        TagContext { service_id: &request.service_id, plan_id: &request.plan_id, ..Default::default() },
        Utc::now(),
    );
    details
}
