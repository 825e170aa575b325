//! # Broker Orchestrator
//!
//! Implements the service broker operations on top of the catalog, the
//! encrypted registry, the SQL engines and the cloud provider.
//!
//! The broker keeps no state between calls. Every operation re-reads the
//! instance from the registry, and the registry is only written once the
//! external side effect it records has succeeded.
//!
//! Shared plans run synchronously against a long-lived engine. Dedicated
//! plans start asynchronous cloud operations whose progress is polled with
//! [`RdsBroker::last_operation`].

pub mod engines;
pub mod last_operation;
pub mod parameters;
pub mod resources;


pub use engines::SharedEngines;
pub use last_operation::{LastOperation, LastOperationState};
pub use parameters::{
    BindDetails, BindParameters, Credentials, DeprovisionDetails, PreviousValues,
    ProvisionDetails, ProvisionParameters, UnbindDetails, UpdateDetails, UpdateParameters,
};

use crate::catalog::{self, Catalog, Service, ServicePlan};
use crate::cloud::{DbClusterProvider, DbInstanceProvider};
use crate::config::{AppConfig, BrokerConfig, SslMode};
use crate::crypto::EncryptionKey;
use crate::domain::{Instance, UserType};
use crate::errors::{BrokerError, ErrorContext, Result};
use crate::registry::Registry;
use crate::sqlengine::{ConnectionConfig, DefaultSqlEngineProvider, SqlEngine, SqlEngineProvider};
use crate::storage::create_pool;
use engines::EngineHandle;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of provision, update and deprovision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationResponse {
    /// The operation continues in the background; poll `last_operation`
    pub is_async: bool,
}

impl OperationResponse {
    fn synchronous() -> Self {
        Self { is_async: false }
    }

    fn asynchronous() -> Self {
        Self { is_async: true }
    }
}

/// Cloud collaborators of the broker
#[derive(Clone)]
pub struct CloudProviders {
    pub instances: Arc<dyn DbInstanceProvider>,
    pub clusters: Arc<dyn DbClusterProvider>,
}

/// Service broker for managed relational databases
pub struct RdsBroker {
    config: BrokerConfig,
    catalog: Catalog,
    registry: Registry,
    key: EncryptionKey,
    cloud: CloudProviders,
    engines: Arc<dyn SqlEngineProvider>,
    shared: SharedEngines,
}

impl RdsBroker {
    pub fn new(
        config: BrokerConfig,
        catalog: Catalog,
        registry: Registry,
        key: EncryptionKey,
        cloud: CloudProviders,
        engines: Arc<dyn SqlEngineProvider>,
        shared: SharedEngines,
    ) -> Self {
        Self { config, catalog, registry, key, cloud, engines, shared }
    }

    /// Wire a broker from loaded configuration: open the registry and every
    /// configured shared engine.
    pub async fn from_config(config: &AppConfig, cloud: CloudProviders) -> Result<Self> {
        let key = config.encryption_key()?;
        let pool = create_pool(&config.database).await?;
        let engines: Arc<dyn SqlEngineProvider> = Arc::new(DefaultSqlEngineProvider);
        let shared = SharedEngines::connect(config, engines.as_ref()).await?;

        info!(
            region = %config.broker.region,
            services = config.catalog.services.len(),
            "RDS broker ready"
        );

        Ok(Self::new(
            config.broker.clone(),
            config.catalog.clone(),
            Registry::new(pool),
            key,
            cloud,
            engines,
            shared,
        ))
    }

    /// Services offered by this broker
    pub fn services(&self) -> &[Service] {
        debug!(services = self.catalog.services.len(), "Listing services");
        &self.catalog.services
    }

    /// Release the shared engines
    pub async fn shutdown(&mut self) {
        self.shared.close().await;
    }

    #[instrument(skip(self, details), fields(instance_id = %instance_id, plan_id = %details.plan_id))]
    pub async fn provision(
        &self,
        instance_id: &str,
        details: &ProvisionDetails,
        async_allowed: bool,
    ) -> Result<OperationResponse> {
        let parameters = ProvisionParameters::from_raw(
            details.parameters.as_ref(),
            self.config.allow_user_provision_parameters,
        )?;

        let plan = self.plan(&details.service_id, &details.plan_id)?;
        let engine = plan.engine()?;

        if !plan.is_shared() && !async_allowed {
            return Err(BrokerError::AsyncRequired);
        }

        // Read-then-write; concurrent provisions of one ID are not guarded.
        if self.registry.exists(instance_id).await? {
            return Err(BrokerError::conflict(
                format!("Instance '{}' already exists", instance_id),
                "instance",
            ));
        }

        let instance = Registry::new_instance(
            &details.service_id,
            &details.plan_id,
            instance_id,
            &self.config.db_prefix,
            &self.key,
        )?;

        let response = if plan.is_shared() {
            self.shared.get(engine)?.create_db(&instance.db_name).await?;
            info!(engine = %engine, db_name = %instance.db_name, "Created shared database");
            OperationResponse::synchronous()
        } else {
            self.create_dedicated(&instance, plan, &parameters, details).await?;
            OperationResponse::asynchronous()
        };

        self.registry
            .save_instance(&instance)
            .await
            .context("DB instance created but failed to save reference to local database")?;

        info!(is_async = response.is_async, "Provisioned instance");
        Ok(response)
    }

    async fn create_dedicated(
        &self,
        instance: &Instance,
        plan: &ServicePlan,
        parameters: &ProvisionParameters,
        request: &ProvisionDetails,
    ) -> Result<()> {
        let master = instance
            .master_user()
            .ok_or_else(|| BrokerError::internal("New instance has no master user"))?;
        let password = master.password(&self.key)?;
        let identifier = self.identifier(&instance.instance_id);

        if plan.rds_properties.is_cluster_style() {
            let cluster = resources::create_cluster_details(
                instance,
                &master.username,
                &password,
                plan,
                parameters,
                request,
            );
            self.cloud.clusters.create(&identifier, &cluster).await?;
            info!(identifier = %identifier, "Created DB cluster");
        }

        let db_instance = resources::create_instance_details(
            instance,
            &master.username,
            &password,
            &identifier,
            plan,
            parameters,
            request,
        );

        if let Err(e) = self.cloud.instances.create(&identifier, &db_instance).await {
            error!(identifier = %identifier, error = %e, "Failed to create DB instance");
            if plan.rds_properties.is_cluster_style() {
                if let Err(rollback) = self
                    .cloud
                    .clusters
                    .delete(&identifier, plan.rds_properties.skip_final_snapshot)
                    .await
                {
                    warn!(identifier = %identifier, error = %rollback, "Failed to roll back DB cluster");
                }
            }
            return Err(e.into());
        }

        info!(identifier = %identifier, "Created DB instance");
        Ok(())
    }

    #[instrument(skip(self, details), fields(instance_id = %instance_id, plan_id = %details.plan_id))]
    pub async fn update(
        &self,
        instance_id: &str,
        details: &UpdateDetails,
        async_allowed: bool,
    ) -> Result<OperationResponse> {
        let parameters = UpdateParameters::from_raw(
            details.parameters.as_ref(),
            self.config.allow_user_update_parameters,
        )?;

        let service = self
            .catalog
            .find_service(&details.service_id)
            .ok_or_else(|| BrokerError::not_found("Service", &details.service_id))?;

        let mut instance = self.registry.get_instance(instance_id).await?;
        let current_plan = self.plan(&instance.service_id, &instance.plan_id)?;
        let new_plan = self.plan(&details.service_id, &details.plan_id)?;

        if !catalog::can_update(current_plan, new_plan, service) {
            return Err(BrokerError::PlanChangeNotSupported);
        }

        if !new_plan.is_shared() && !async_allowed {
            return Err(BrokerError::AsyncRequired);
        }

        // Extensions go first: a disruptive modify can leave the server
        // unreachable for a while.
        if let Some(extensions) = &parameters.extensions {
            let handle = self.open_engine(&instance, new_plan).await?;
            let result = handle.engine().set_extensions(extensions).await;
            handle.release().await;
            result?;
            info!(extensions = ?extensions, "Updated extensions");
        }

        let response = if new_plan.is_shared() {
            OperationResponse::synchronous()
        } else {
            let identifier = self.identifier(instance_id);

            if new_plan.rds_properties.is_cluster_style() {
                let cluster = resources::modify_cluster_details(new_plan, &parameters, details);
                self.cloud
                    .clusters
                    .modify(&identifier, &cluster, parameters.apply_immediately)
                    .await?;
            }

            let db_instance = resources::modify_instance_details(new_plan, &parameters, details);
            self.cloud
                .instances
                .modify(&identifier, &db_instance, parameters.apply_immediately)
                .await?;

            info!(identifier = %identifier, apply_immediately = parameters.apply_immediately, "Modified DB instance");
            OperationResponse::asynchronous()
        };

        if instance.plan_id != new_plan.id {
            instance.plan_id = new_plan.id.clone();
            self.registry.save_instance(&instance).await?;
        }

        Ok(response)
    }

    #[instrument(skip(self, details), fields(instance_id = %instance_id, plan_id = %details.plan_id))]
    pub async fn deprovision(
        &self,
        instance_id: &str,
        details: &DeprovisionDetails,
        async_allowed: bool,
    ) -> Result<OperationResponse> {
        if !async_allowed {
            return Err(BrokerError::AsyncRequired);
        }

        let plan = self.plan(&details.service_id, &details.plan_id)?;
        let instance = self.registry.get_instance(instance_id).await?;

        if plan.is_shared() {
            let engine = self.shared.get(plan.engine()?)?;

            for user in instance.users.iter().filter(|user| user.user_type != UserType::Master) {
                if let Err(e) = engine.drop_user(&user.username).await {
                    warn!(username = %user.username, error = %e, "Failed to drop user");
                }
            }
            engine.drop_db(&instance.db_name).await?;

            if let Err(e) = self.registry.delete_instance(instance_id).await {
                error!(error = %e, "Dropped shared database but failed to delete registry instance");
            }
            return Ok(OperationResponse::synchronous());
        }

        let identifier = self.identifier(instance_id);
        let cluster_style = plan.rds_properties.is_cluster_style();
        let skip_final_snapshot = cluster_style || plan.rds_properties.skip_final_snapshot;

        self.cloud.instances.delete(&identifier, skip_final_snapshot).await?;
        info!(identifier = %identifier, skip_final_snapshot, "Deleting DB instance");

        if cluster_style {
            if let Err(e) = self
                .cloud
                .clusters
                .delete(&identifier, plan.rds_properties.skip_final_snapshot)
                .await
            {
                warn!(identifier = %identifier, error = %e, "Failed to delete DB cluster");
            }
        }

        // The registry row stays until last_operation sees the instance gone.
        Ok(OperationResponse::asynchronous())
    }

    #[instrument(skip(self, details), fields(instance_id = %instance_id, binding_id = %binding_id))]
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: &BindDetails,
    ) -> Result<Credentials> {
        let parameters = BindParameters::from_raw(
            details.parameters.as_ref(),
            self.config.allow_user_bind_parameters,
        )?;

        let service = self
            .catalog
            .find_service(&details.service_id)
            .ok_or_else(|| BrokerError::not_found("Service", &details.service_id))?;
        if !service.bindable {
            return Err(BrokerError::validation("Service is not bindable"));
        }

        let plan = self.plan(&details.service_id, &details.plan_id)?;
        let instance = self.registry.get_instance(instance_id).await?;

        let handle = self.open_engine(&instance, plan).await?;
        let result = self
            .bind_user(handle.engine(), &instance, binding_id, &parameters, details.app_guid.as_deref())
            .await;
        handle.release().await;
        result
    }

    async fn bind_user(
        &self,
        engine: &dyn SqlEngine,
        instance: &Instance,
        binding_id: &str,
        parameters: &BindParameters,
        app_guid: Option<&str>,
    ) -> Result<Credentials> {
        let username = binding_username(
            engine,
            parameters.requested_username(),
            app_guid,
            &instance.instance_id,
        );

        let (user, is_new) = self
            .registry
            .bind(&instance.instance_id, binding_id, &username, UserType::Standard, &self.key)
            .await?;
        let password = user.password(&self.key)?;

        if is_new {
            if let Err(e) = self.create_database_user(engine, instance, &user.username, &password).await {
                self.forget_user(instance, binding_id).await;
                return Err(e);
            }
            info!(username = %user.username, "Created database user");
        } else {
            debug!(username = %user.username, "Reusing existing database user");
        }

        Ok(Credentials {
            host: engine.address().to_string(),
            port: engine.port(),
            name: instance.db_name.clone(),
            username: user.username.clone(),
            uri: engine.uri(&instance.db_name, &user.username, &password),
            jdbc_uri: engine.jdbc_uri(&instance.db_name, &user.username, &password),
            hostname: engine.address().to_string(),
            dbname: instance.db_name.clone(),
            password,
        })
    }

    async fn create_database_user(
        &self,
        engine: &dyn SqlEngine,
        instance: &Instance,
        username: &str,
        password: &str,
    ) -> Result<()> {
        engine.create_user(username, password).await?;
        if let Err(e) = engine.grant_privileges(&instance.db_name, username).await {
            if let Err(drop_err) = engine.drop_user(username).await {
                warn!(username = %username, error = %drop_err, "Failed to drop user after grant failure");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Drop the registry user recorded for a bind whose database user never came to be
    async fn forget_user(&self, instance: &Instance, binding_id: &str) {
        let removed = match self.registry.unbind(&instance.instance_id, binding_id).await {
            Ok((user, _)) => self.registry.delete_user(&user).await,
            Err(e) => Err(e),
        };
        if let Err(e) = removed {
            warn!(binding_id = %binding_id, error = %e, "Failed to remove registry user after bind failure");
        }
    }

    #[instrument(skip(self, details), fields(instance_id = %instance_id, binding_id = %binding_id))]
    pub async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: &UnbindDetails,
    ) -> Result<()> {
        let plan = self.plan(&details.service_id, &details.plan_id)?;
        let instance = self.registry.get_instance(instance_id).await?;

        let handle = self.open_engine(&instance, plan).await?;
        let result = self.unbind_user(handle.engine(), &instance, binding_id).await;
        handle.release().await;
        result
    }

    async fn unbind_user(&self, engine: &dyn SqlEngine, instance: &Instance, binding_id: &str) -> Result<()> {
        let (user, should_delete) = self.registry.unbind(&instance.instance_id, binding_id).await?;

        if !should_delete {
            debug!(username = %user.username, bindings = user.bindings.len(), "User still has bindings");
            return Ok(());
        }

        engine.revoke_privileges(&instance.db_name, &user.username).await?;
        engine.drop_user(&user.username).await?;

        if let Err(e) = self.registry.delete_user(&user).await {
            error!(username = %user.username, error = %e, "Dropped database user but failed to delete registry user");
        }
        info!(username = %user.username, "Removed database user");
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn last_operation(&self, instance_id: &str) -> Result<LastOperation> {
        let instance = self.registry.get_instance(instance_id).await?;
        let plan = self.plan(&instance.service_id, &instance.plan_id)?;

        if plan.is_shared() {
            return Ok(LastOperation::none());
        }

        let identifier = self.identifier(instance_id);
        match self.cloud.instances.describe(&identifier).await {
            Ok(description) => {
                let operation = LastOperation::from_description(&identifier, &description);
                debug!(state = %operation.state, status = %description.status, "Described DB instance");
                Ok(operation)
            }
            Err(e) if e.is_does_not_exist() => {
                info!(identifier = %identifier, "DB instance is gone; removing registry instance");
                if let Err(e) = self.registry.delete_instance(instance_id).await {
                    error!(error = %e, "Failed to delete registry instance");
                }
                Err(BrokerError::InstanceDoesNotExist)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn plan(&self, service_id: &str, plan_id: &str) -> Result<&ServicePlan> {
        self.catalog
            .find_service_plan(service_id, plan_id)
            .ok_or_else(|| BrokerError::not_found("Service Plan", plan_id))
    }

    fn identifier(&self, instance_id: &str) -> String {
        resources::resource_identifier(&self.config.db_prefix, instance_id)
    }

    /// Engine for SQL work on an instance: the shared engine for shared
    /// plans, otherwise a fresh connection as the master user
    async fn open_engine(&self, instance: &Instance, plan: &ServicePlan) -> Result<EngineHandle<'_>> {
        let engine = plan.engine()?;
        if plan.is_shared() {
            return Ok(EngineHandle::Shared(self.shared.get(engine)?));
        }

        let (address, port, dbname) = self.connection_info(instance, plan).await?;
        let master = instance
            .master_user()
            .ok_or_else(|| BrokerError::internal(format!("Instance '{}' has no master user", instance.instance_id)))?;

        let mut handle = self.engines.engine(engine)?;
        handle
            .open(ConnectionConfig {
                address,
                port,
                dbname,
                username: master.username.clone(),
                password: master.password(&self.key)?,
                ssl_mode: SslMode::Require,
            })
            .await?;
        Ok(EngineHandle::Dedicated(handle))
    }

    /// Address, port and database name of a dedicated instance
    async fn connection_info(&self, instance: &Instance, plan: &ServicePlan) -> Result<(String, u16, String)> {
        let identifier = self.identifier(&instance.instance_id);

        let (address, port, dbname) = if plan.rds_properties.is_cluster_style() {
            let cluster = self.cloud.clusters.describe(&identifier).await?;
            (cluster.endpoint, cluster.port, cluster.database_name)
        } else {
            let described = self.cloud.instances.describe(&identifier).await?;
            (described.address, described.port, described.db_name)
        };

        let dbname = if dbname.is_empty() { instance.db_name.clone() } else { dbname };
        Ok((address, port, dbname))
    }
}

/// Username for a new binding.
///
/// Engines that honour caller-chosen names use the requested name, then one
/// derived from the application ID. Everything else is generated by the
/// engine.
fn binding_username(
    engine: &dyn SqlEngine,
    requested: Option<&str>,
    app_guid: Option<&str>,
    instance_id: &str,
) -> String {
    if engine.accepts_requested_username() {
        if let Some(requested) = requested {
            return requested.to_string();
        }
        if let Some(app_guid) = app_guid.filter(|id| !id.is_empty()) {
            return format!("u{}", app_guid.replace('-', "_"));
        }
    }
    engine.create_username(instance_id)
}
