//! Fine-grained group controller.
//!
//! Consumes the three fine-grained config tables, reacts to next-hop and
//! link state transitions, and owns group materialisation and teardown.
//! Collaborators (neighbour layer, router interfaces, the route
//! orchestrator's group-count ceiling, resource counters) are reached
//! through [`FgNhgOrchCallbacks`]; the ASIC through the fine-grained group
//! southbound.

use super::planner::calculate_bank_hash_bucket_ranges;
use super::rebalance::{
    compute_and_set_bucket_changes, remove_group_objects, set_state_route_entry, RebalanceCtx,
};
use super::recovery::RecoveryMap;
use super::store::FgNhgStore;
use super::types::{
    Bank, BankMemberChanges, FgGroupInstance, FgMatchMode, FgNextHopInfo, FgNhgEntry,
};
use crate::crm::CrmResourceType;
use crate::route::{NextHopGroupKey, NextHopKey};
use async_trait::async_trait;
use fgecmp_orch_common::{
    Consumer, ConsumerConfig, KeyOpFieldsValues, Operation, Orch, TaskError, TaskResult,
    WarmRestartTable,
};
use fgecmp_sai::api::{FineGrainedGroupApi, RouteNextHopId};
use fgecmp_sai::{NextHopOid, RouterInterfaceOid, SaiError, VirtualRouterOid};
use fgecmp_types::{IpAddress, IpPrefix, PortOperStatus};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Config table names consumed by this Orch.
pub const FG_NHG_TABLE: &str = "FG_NHG";
pub const FG_NHG_PREFIX_TABLE: &str = "FG_NHG_PREFIX";
pub const FG_NHG_MEMBER_TABLE: &str = "FG_NHG_MEMBER";

/// Error type for fine-grained group operations.
#[derive(Debug, Error)]
pub enum FgNhgError {
    #[error("Southbound error: {0}")]
    Sai(#[from] SaiError),

    #[error("Callbacks not set")]
    CallbacksNotSet,

    #[error("Maximum next-hop group count reached")]
    MaxGroupsReached,

    #[error("Router interface not found for {0}")]
    RifNotFound(String),

    #[error("No programmed next-hop id for {0}")]
    MissingNextHopId(NextHopKey),

    #[error("Next-hop {0} missing from bucket map")]
    NextHopNotInBucketMap(NextHopKey),

    #[error("Next-hop {0} owns too few buckets to donate")]
    InsufficientBuckets(NextHopKey),

    #[error("No resolved next-hops to install")]
    NoResolvedNextHops,

    #[error("Group not configured: {0}")]
    GroupNotConfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for fine-grained group operations.
pub type Result<T> = std::result::Result<T, FgNhgError>;

/// Configuration for the fine-grained controller.
#[derive(Debug, Clone)]
pub struct FgNhgOrchConfig {
    /// The default virtual router; fine-grained treatment is scoped to it.
    pub default_vrf: VirtualRouterOid,
    /// Simulator platforms provision exactly the configured bucket count,
    /// so the real-size query is skipped.
    pub simulated_bucket_size: bool,
}

impl FgNhgOrchConfig {
    pub fn new(default_vrf: VirtualRouterOid) -> Self {
        Self {
            default_vrf,
            simulated_bucket_size: false,
        }
    }

    pub fn with_simulated_bucket_size(mut self) -> Self {
        self.simulated_bucket_size = true;
        self
    }
}

/// Collaborator surface of the fine-grained controller.
///
/// Implementations wrap the neighbour resolver, the router-interface and
/// port tables, the route orchestrator, and the resource registry.
pub trait FgNhgOrchCallbacks: Send + Sync {
    /// True when the neighbour layer has a programmed next-hop for the key.
    fn has_next_hop(&self, nh: &NextHopKey) -> bool;

    fn next_hop_id(&self, nh: &NextHopKey) -> Option<NextHopOid>;

    /// True when the next-hop carries the interface-down flag.
    fn is_next_hop_if_down(&self, nh: &NextHopKey) -> bool;

    fn increase_next_hop_ref_count(&self, nh: &NextHopKey);

    fn decrease_next_hop_ref_count(&self, nh: &NextHopKey);

    /// Resolves a bare IP to its full next-hop key, when resolved.
    fn resolve_neighbor(&self, ip: &IpAddress) -> Option<NextHopKey>;

    fn router_intf_id(&self, alias: &str) -> Option<RouterInterfaceOid>;

    /// Router-interface reference counts, held while a degraded route
    /// points at the interface instead of a group.
    fn increase_router_intf_ref_count(&self, alias: &str);
    fn decrease_router_intf_ref_count(&self, alias: &str);

    /// Oper state of a port; `None` for unknown port names.
    fn port_oper_status(&self, alias: &str) -> Option<PortOperStatus>;

    /// Current and maximum group counts from the route orchestrator.
    fn nhg_count(&self) -> usize;
    fn max_nhg_count(&self) -> usize;
    fn inc_nhg_count(&self);
    fn dec_nhg_count(&self);

    /// The declared next-hop set of an already-synced regular route.
    fn regular_route_nhg(&self, vrf: VirtualRouterOid, prefix: &IpPrefix)
        -> Option<NextHopGroupKey>;

    /// Asks the route orchestrator to reprogram a route; used when a
    /// prefix transitions between regular and fine-grained ECMP.
    fn resubmit_route(&self, vrf: VirtualRouterOid, prefix: &IpPrefix, nhg: &NextHopGroupKey)
        -> bool;

    fn increase_vrf_ref_count(&self, vrf: VirtualRouterOid);
    fn decrease_vrf_ref_count(&self, vrf: VirtualRouterOid);

    fn inc_resource(&self, resource: CrmResourceType);
    fn dec_resource(&self, resource: CrmResourceType);
}

/// The fine-grained ECMP controller.
pub struct FgNhgOrch {
    config: FgNhgOrchConfig,
    api: Arc<dyn FineGrainedGroupApi>,
    state_table: Arc<dyn WarmRestartTable>,
    callbacks: Option<Arc<dyn FgNhgOrchCallbacks>>,
    store: FgNhgStore,
    recovery: RecoveryMap,
    group_consumer: Consumer,
    prefix_consumer: Consumer,
    member_consumer: Consumer,
}

impl FgNhgOrch {
    pub fn new(
        config: FgNhgOrchConfig,
        api: Arc<dyn FineGrainedGroupApi>,
        state_table: Arc<dyn WarmRestartTable>,
    ) -> Self {
        Self {
            config,
            api,
            state_table,
            callbacks: None,
            store: FgNhgStore::new(),
            recovery: RecoveryMap::new(),
            group_consumer: Consumer::new(ConsumerConfig::new(FG_NHG_TABLE)),
            prefix_consumer: Consumer::new(ConsumerConfig::new(FG_NHG_PREFIX_TABLE).with_priority(1)),
            member_consumer: Consumer::new(ConsumerConfig::new(FG_NHG_MEMBER_TABLE).with_priority(2)),
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn FgNhgOrchCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    /// Read access to the group store, for diagnostics and tests.
    pub fn store(&self) -> &FgNhgStore {
        &self.store
    }

    /// Queues a FG_NHG table delta.
    pub fn queue_group_task(&mut self, entry: KeyOpFieldsValues) {
        self.group_consumer.add_to_sync(vec![entry]);
    }

    /// Queues a FG_NHG_PREFIX table delta.
    pub fn queue_prefix_task(&mut self, entry: KeyOpFieldsValues) {
        self.prefix_consumer.add_to_sync(vec![entry]);
    }

    /// Queues a FG_NHG_MEMBER table delta.
    pub fn queue_member_task(&mut self, entry: KeyOpFieldsValues) {
        self.member_consumer.add_to_sync(vec![entry]);
    }

    fn callbacks(&self) -> Result<Arc<dyn FgNhgOrchCallbacks>> {
        self.callbacks.clone().ok_or(FgNhgError::CallbacksNotSet)
    }

    /// Decides whether a route should receive fine-grained treatment.
    ///
    /// Route-based groups match via the attached-prefix index. Nexthop-based
    /// groups match when every next-hop of the set belongs to the same
    /// group.
    pub fn is_route_fine_grained(
        &self,
        vrf: VirtualRouterOid,
        prefix: &IpPrefix,
        nhs: &NextHopGroupKey,
    ) -> bool {
        if !self.store.is_configured() || vrf != self.config.default_vrf {
            return false;
        }

        if self.store.group_name_for_prefix(prefix).is_some() {
            return true;
        }

        if nhs.is_empty() {
            return false;
        }

        let mut found: Option<&String> = None;
        for nh in nhs.iter() {
            match self.store.group_name_for_nexthop(nh.ip_address()) {
                None => {
                    if found.is_some() {
                        warn!(
                            "Route {}:{} has some fine-grained next-hops but {} is not one, \
                             defaulting to regular ECMP",
                            prefix, nhs, nh
                        );
                    }
                    return false;
                }
                Some(group) => match found {
                    None => found = Some(group),
                    Some(existing) if existing != group => {
                        info!(
                            "Next-hop {} belongs to group {} but {} was expected, \
                             defaulting to regular ECMP",
                            nh, group, existing
                        );
                        return false;
                    }
                    Some(_) => {}
                },
            }
        }

        true
    }

    /// True when a fine-grained instance is synced for this route.
    pub fn contains_fg_route(&self, vrf: VirtualRouterOid, prefix: &IpPrefix) -> bool {
        if !self.store.is_configured() || vrf != self.config.default_vrf {
            return false;
        }
        self.store.has_instance(vrf, prefix)
    }

    /// Installs or updates the fine-grained route for `prefix`.
    ///
    /// Returns the object the route must point at and whether that object
    /// changed (materialisation, re-promotion, or first install).
    pub async fn set_fg_route(
        &mut self,
        vrf: VirtualRouterOid,
        prefix: IpPrefix,
        nhs: NextHopGroupKey,
    ) -> Result<(RouteNextHopId, bool)> {
        let callbacks = self.callbacks()?;

        let group_name = match self.store.group_name_for_prefix(&prefix) {
            Some(name) => name.clone(),
            None => {
                let first = nhs.iter().next().ok_or_else(|| {
                    FgNhgError::Internal(format!("route {} declared with no next-hops", prefix))
                })?;
                self.store
                    .group_name_for_nexthop(first.ip_address())
                    .cloned()
                    .ok_or_else(|| {
                        error!(
                            "Route addition {}:{} for non-configured fine-grained entry",
                            prefix, nhs
                        );
                        FgNhgError::GroupNotConfigured(prefix.to_string())
                    })?
            }
        };

        // unchanged declared set: nothing to do
        if let Some(instance) = self.store.instance(vrf, &prefix) {
            if instance.nhg_key == nhs {
                return Ok((instance.next_hop_id, false));
            }
        }

        let mut changes;
        let mut nh_oids: HashMap<NextHopKey, NextHopOid> = HashMap::new();
        let mut next_hop_to_add = false;
        {
            let entry = self
                .store
                .group(&group_name)
                .ok_or_else(|| FgNhgError::GroupNotConfigured(group_name.clone()))?;

            let num_banks = entry.bank_ranges.len().max(entry.num_banks() as usize);
            changes = vec![BankMemberChanges::default(); num_banks];

            let existing_active = self
                .store
                .instance(vrf, &prefix)
                .map(|i| i.active_nexthops.clone());

            // Filter the declared set down to usable members and classify
            // the rest of the work per bank.
            for nh in nhs.iter() {
                if !callbacks.has_next_hop(nh) {
                    info!("Next-hop {} in {} not yet resolved, skipping", nh, nhs);
                    continue;
                }
                let Some(member) = entry.next_hops.get(nh.ip_address()) else {
                    warn!(
                        "Next-hop {} is not a member of fine-grained group {}, skipping",
                        nh, entry.name
                    );
                    continue;
                };
                if member.link.is_some() && !member.link_oper_state.is_up() {
                    info!(
                        "Tracked link {} associated with next-hop {} is down",
                        member.link.as_deref().unwrap_or(""),
                        nh
                    );
                    continue;
                }
                if callbacks.is_next_hop_if_down(nh) {
                    info!("Next-hop {} in {} is down, skipping", nh, nhs);
                    continue;
                }
                let Some(oid) = callbacks.next_hop_id(nh) else {
                    continue;
                };

                let is_new = existing_active.as_ref().map_or(true, |a| !a.contains(nh));
                if is_new {
                    changes[member.bank as usize].nhs_to_add.push(nh.clone());
                    next_hop_to_add = true;
                }
                nh_oids.insert(nh.clone(), oid);
            }
        }

        let mut changed = false;

        if let Some(mut instance) = self.store.take_instance(vrf, &prefix) {
            // Route exists and next-hops were associated in the past.
            if instance.points_to_rif() {
                if next_hop_to_add {
                    changed = true;
                    let recovery = self.recovery.get(&prefix.to_string()).cloned();
                    let Some(entry) = self.store.group_mut(&group_name) else {
                        self.store.put_instance(vrf, prefix, instance);
                        return Err(FgNhgError::GroupNotConfigured(group_name));
                    };
                    let result = create_fg_group(
                        &self.config,
                        self.api.as_ref(),
                        self.state_table.as_ref(),
                        callbacks.as_ref(),
                        vrf,
                        &prefix,
                        entry,
                        &mut instance,
                        &changes,
                        &nh_oids,
                        recovery.as_deref(),
                    )
                    .await;
                    if let Err(e) = result {
                        self.store.put_instance(vrf, prefix, instance);
                        return Err(e);
                    }
                    self.recovery.remove(&prefix.to_string());

                    // the route no longer leans on the router interface
                    if let Some(alias) = instance.rif_alias.take() {
                        callbacks.decrease_router_intf_ref_count(&alias);
                    }
                }
            } else {
                // classify currently-active next-hops into survivors and
                // deletions
                let Some(entry) = self.store.group(&group_name) else {
                    self.store.put_instance(vrf, prefix, instance);
                    return Err(FgNhgError::GroupNotConfigured(group_name));
                };
                for nh in instance.active_nexthops.iter() {
                    let bank = entry.bank_of(nh.ip_address()).unwrap_or(0) as usize;
                    if nh_oids.contains_key(nh) {
                        changes[bank].active_nhs.push(nh.clone());
                    } else {
                        changes[bank].nhs_to_del.push(nh.clone());
                    }
                }

                let ctx = RebalanceCtx {
                    api: self.api.as_ref(),
                    state: self.state_table.as_ref(),
                    callbacks: callbacks.as_ref(),
                    vrf,
                    prefix: &prefix,
                    nh_oids: &nh_oids,
                };
                if let Err(e) =
                    compute_and_set_bucket_changes(&ctx, entry, &mut instance, &changes).await
                {
                    self.store.put_instance(vrf, prefix, instance);
                    return Err(e);
                }
            }

            instance.nhg_key = nhs.clone();
            self.store.put_instance(vrf, prefix, instance);
        } else {
            // first fine-grained install for this route
            changed = true;
            let mut instance = FgGroupInstance::new();

            if next_hop_to_add {
                let recovery = self.recovery.get(&prefix.to_string()).cloned();
                let entry = self
                    .store
                    .group_mut(&group_name)
                    .ok_or_else(|| FgNhgError::GroupNotConfigured(group_name.clone()))?;
                create_fg_group(
                    &self.config,
                    self.api.as_ref(),
                    self.state_table.as_ref(),
                    callbacks.as_ref(),
                    vrf,
                    &prefix,
                    entry,
                    &mut instance,
                    &changes,
                    &nh_oids,
                    recovery.as_deref(),
                )
                .await?;
                self.recovery.remove(&prefix.to_string());
            } else {
                // no member is resolvable yet: point the route at a router
                // interface so the kernel can resolve neighbours
                let first = nhs.iter().next().ok_or_else(|| {
                    FgNhgError::Internal(format!("route {} declared with no next-hops", prefix))
                })?;
                let rif = callbacks.router_intf_id(first.alias()).ok_or_else(|| {
                    info!(
                        "Failed to get router interface next hop {} for {}",
                        nhs, prefix
                    );
                    FgNhgError::RifNotFound(first.alias().to_string())
                })?;
                callbacks.increase_router_intf_ref_count(first.alias());
                instance.clear_to_rif(rif, first.alias().to_string());
            }

            instance.nhg_key = nhs.clone();
            if self.store.put_instance(vrf, prefix, instance) {
                callbacks.increase_vrf_ref_count(vrf);
            }
        }

        // reference counts follow the per-bank deltas
        for change in &changes {
            for nh in &change.nhs_to_add {
                callbacks.increase_next_hop_ref_count(nh);
                info!("Fine-grained next-hop {} for prefix {} is up", nh, prefix);
            }
            for nh in &change.nhs_to_del {
                callbacks.decrease_next_hop_ref_count(nh);
                info!("Fine-grained next-hop {} for prefix {} is down", nh, prefix);
            }
        }

        let instance = self
            .store
            .instance(vrf, &prefix)
            .ok_or_else(|| FgNhgError::Internal("instance vanished after install".to_string()))?;
        Ok((instance.next_hop_id, changed))
    }

    /// Destroys the fine-grained instance of a removed route.
    pub async fn remove_fg_route(&mut self, vrf: VirtualRouterOid, prefix: &IpPrefix) -> Result<()> {
        if !self.store.is_configured() {
            return Ok(());
        }
        let callbacks = self.callbacks()?;

        let Some(mut instance) = self.store.take_instance(vrf, prefix) else {
            info!("No fine-grained route entry for {}, nothing to remove", prefix);
            return Ok(());
        };

        if !instance.points_to_rif() {
            if let Err(e) =
                remove_group_objects(self.api.as_ref(), callbacks.as_ref(), &mut instance).await
            {
                error!("Failed to clean up fine-grained group for {}: {}", prefix, e);
                self.store.put_instance(vrf, *prefix, instance);
                return Err(e);
            }

            for nh in &instance.active_nexthops {
                callbacks.decrease_next_hop_ref_count(nh);
            }

            self.state_table.del(&prefix.to_string());
        } else if let Some(alias) = instance.rif_alias.take() {
            callbacks.decrease_router_intf_ref_count(&alias);
        }

        if self.store.cleanup_vrf(vrf) {
            callbacks.decrease_vrf_ref_count(vrf);
        }

        info!("Removed fine-grained route {}", prefix);
        Ok(())
    }

    /// Activates a newly-usable next-hop in every instance declaring it.
    pub async fn on_next_hop_up(&mut self, nh: &NextHopKey) -> Result<()> {
        let callbacks = self.callbacks()?;

        for (vrf, prefix) in self.store.instances_containing(nh) {
            let group_name = self.resolve_group_name(&prefix, nh)?;

            let Some(instance_ref) = self.store.instance(vrf, &prefix) else {
                continue;
            };
            if instance_ref.active_nexthops.contains(nh) {
                continue;
            }

            let entry_ref = self
                .store
                .group(&group_name)
                .ok_or_else(|| FgNhgError::GroupNotConfigured(group_name.clone()))?;
            let Some(bank) = entry_ref.bank_of(nh.ip_address()) else {
                warn!("Next-hop {} is not in the member table of {}", nh, group_name);
                continue;
            };
            let num_banks = entry_ref.bank_ranges.len().max(entry_ref.num_banks() as usize);

            let mut changes = vec![BankMemberChanges::default(); num_banks];
            changes[bank as usize].nhs_to_add.push(nh.clone());

            let mut nh_oids: HashMap<NextHopKey, NextHopOid> = HashMap::new();
            nh_oids.insert(
                nh.clone(),
                callbacks
                    .next_hop_id(nh)
                    .ok_or_else(|| FgNhgError::MissingNextHopId(nh.clone()))?,
            );

            if instance_ref.points_to_rif() {
                // the route resolved its first neighbour: re-promote to a
                // fine-grained group
                let recovery = self.recovery.get(&prefix.to_string()).cloned();
                let Some(mut instance) = self.store.take_instance(vrf, &prefix) else {
                    continue;
                };
                let Some(entry) = self.store.group_mut(&group_name) else {
                    self.store.put_instance(vrf, prefix, instance);
                    return Err(FgNhgError::GroupNotConfigured(group_name));
                };

                let result = create_fg_group(
                    &self.config,
                    self.api.as_ref(),
                    self.state_table.as_ref(),
                    callbacks.as_ref(),
                    vrf,
                    &prefix,
                    entry,
                    &mut instance,
                    &changes,
                    &nh_oids,
                    recovery.as_deref(),
                )
                .await;
                if let Err(e) = result {
                    self.store.put_instance(vrf, prefix, instance);
                    return Err(e);
                }
                self.recovery.remove(&prefix.to_string());

                // the route no longer leans on the router interface
                if let Some(alias) = instance.rif_alias.take() {
                    callbacks.decrease_router_intf_ref_count(&alias);
                }

                let next_hop_id = instance.next_hop_id;
                let result = self.api.set_route_next_hop(vrf, &prefix, next_hop_id).await;
                self.store.put_instance(vrf, prefix, instance);
                if let Err(e) = result {
                    error!("Failed to repoint route {} at its group: {}", prefix, e);
                    return Err(e.into());
                }
            } else {
                for active in instance_ref.active_nexthops.iter() {
                    if let Some(active_bank) = entry_ref.bank_of(active.ip_address()) {
                        changes[active_bank as usize].active_nhs.push(active.clone());
                    }
                }

                let Some(mut instance) = self.store.take_instance(vrf, &prefix) else {
                    continue;
                };
                let Some(entry) = self.store.group(&group_name) else {
                    self.store.put_instance(vrf, prefix, instance);
                    return Err(FgNhgError::GroupNotConfigured(group_name));
                };
                let ctx = RebalanceCtx {
                    api: self.api.as_ref(),
                    state: self.state_table.as_ref(),
                    callbacks: callbacks.as_ref(),
                    vrf,
                    prefix: &prefix,
                    nh_oids: &nh_oids,
                };
                let result =
                    compute_and_set_bucket_changes(&ctx, entry, &mut instance, &changes).await;
                self.store.put_instance(vrf, prefix, instance);
                if let Err(e) = result {
                    error!("Failed to set fine-grained next hop {}: {}", nh, e);
                    return Err(e);
                }
            }

            callbacks.increase_next_hop_ref_count(nh);
            info!("Fine-grained next-hop {} for prefix {} is up", nh, prefix);
        }

        Ok(())
    }

    /// Deactivates a no-longer-usable next-hop in every instance using it.
    pub async fn on_next_hop_down(&mut self, nh: &NextHopKey) -> Result<()> {
        let callbacks = self.callbacks()?;

        for (vrf, prefix) in self.store.instances_containing(nh) {
            let group_name = self.resolve_group_name(&prefix, nh)?;

            let Some(instance_ref) = self.store.instance(vrf, &prefix) else {
                continue;
            };
            if !instance_ref.active_nexthops.contains(nh) {
                continue;
            }

            let entry_ref = self
                .store
                .group(&group_name)
                .ok_or_else(|| FgNhgError::GroupNotConfigured(group_name.clone()))?;
            let num_banks = entry_ref.bank_ranges.len().max(entry_ref.num_banks() as usize);

            let mut changes = vec![BankMemberChanges::default(); num_banks];
            let mut nh_oids: HashMap<NextHopKey, NextHopOid> = HashMap::new();

            for active in instance_ref.active_nexthops.iter() {
                if active == nh {
                    continue;
                }
                let Some(bank) = entry_ref.bank_of(active.ip_address()) else {
                    continue;
                };
                changes[bank as usize].active_nhs.push(active.clone());
                nh_oids.insert(
                    active.clone(),
                    callbacks
                        .next_hop_id(active)
                        .ok_or_else(|| FgNhgError::MissingNextHopId(active.clone()))?,
                );
            }

            let Some(bank) = entry_ref.bank_of(nh.ip_address()) else {
                warn!("Next-hop {} is not in the member table of {}", nh, group_name);
                continue;
            };
            changes[bank as usize].nhs_to_del.push(nh.clone());

            let Some(mut instance) = self.store.take_instance(vrf, &prefix) else {
                continue;
            };
            let Some(entry) = self.store.group(&group_name) else {
                self.store.put_instance(vrf, prefix, instance);
                return Err(FgNhgError::GroupNotConfigured(group_name));
            };
            let ctx = RebalanceCtx {
                api: self.api.as_ref(),
                state: self.state_table.as_ref(),
                callbacks: callbacks.as_ref(),
                vrf,
                prefix: &prefix,
                nh_oids: &nh_oids,
            };
            let result = compute_and_set_bucket_changes(&ctx, entry, &mut instance, &changes).await;
            self.store.put_instance(vrf, prefix, instance);
            if let Err(e) = result {
                error!("Failed to set fine-grained next hop {}: {}", nh, e);
                return Err(e);
            }

            callbacks.decrease_next_hop_ref_count(nh);
            info!("Fine-grained next-hop {} for prefix {} is down", nh, prefix);
        }

        Ok(())
    }

    /// Applies a port oper-state transition to every link-pinned member.
    pub async fn on_port_oper_change(
        &mut self,
        alias: &str,
        status: PortOperStatus,
    ) -> Result<()> {
        let callbacks = self.callbacks()?;

        let affected: Vec<(String, Vec<IpAddress>)> = self
            .store
            .groups()
            .filter_map(|(name, entry)| {
                entry
                    .links
                    .get(alias)
                    .map(|ips| (name.clone(), ips.clone()))
            })
            .collect();

        for (group_name, ips) in affected {
            for ip in ips {
                match self
                    .store
                    .group_mut(&group_name)
                    .and_then(|entry| entry.next_hops.get_mut(&ip))
                {
                    Some(member) => {
                        member.link_oper_state = status;
                        info!("Updated {} associated with {} to state {}", alias, ip, status);
                    }
                    None => {
                        warn!("Hit unexpected condition where structs are out of sync");
                        continue;
                    }
                }

                let Some(nh) = callbacks.resolve_neighbor(&ip) else {
                    continue;
                };

                let result = if status.is_up() {
                    self.on_next_hop_up(&nh).await
                } else {
                    self.on_next_hop_down(&nh).await
                };
                if let Err(e) = result {
                    warn!(
                        "Failed {} transition for next-hop {} on {}: {}",
                        status, nh, alias, e
                    );
                }
            }
        }

        Ok(())
    }

    fn resolve_group_name(&self, prefix: &IpPrefix, nh: &NextHopKey) -> Result<String> {
        if let Some(name) = self.store.group_name_for_prefix(prefix) {
            return Ok(name.clone());
        }
        self.store
            .group_name_for_nexthop(nh.ip_address())
            .cloned()
            .ok_or_else(|| {
                error!(
                    "Next-hop transition for non-configured fine-grained entry ({} on {})",
                    nh, prefix
                );
                FgNhgError::GroupNotConfigured(nh.to_string())
            })
    }

    fn handle_group_task(&mut self, task: &KeyOpFieldsValues) -> TaskResult<()> {
        let name = task.key.as_str();

        match task.op {
            Operation::Set => {
                let mut bucket_size = 0u32;
                let mut match_mode = FgMatchMode::RouteBased;

                for (field, value) in &task.fvs {
                    match field.as_str() {
                        "bucket_size" => bucket_size = value.parse().unwrap_or(0),
                        "match_mode" => {
                            if value == "nexthop-based" {
                                match_mode = FgMatchMode::NexthopBased;
                            } else if value != "route-based" {
                                warn!(
                                    "Received unsupported match_mode {}, defaulted to route-based",
                                    value
                                );
                            }
                        }
                        _ => {}
                    }
                }

                if bucket_size == 0 {
                    error!("Received zero bucket_size for group {}", name);
                    return Err(TaskError::invalid_entry("bucket_size is zero"));
                }

                if self.store.group(name).is_some() {
                    warn!("FG_NHG {} already exists, ignoring", name);
                    return Ok(());
                }

                self.store
                    .insert_group(FgNhgEntry::new(name, bucket_size, match_mode));
                info!(
                    "Added fine-grained group {} with bucket size {}, match mode {:?}",
                    name, bucket_size, match_mode
                );
                Ok(())
            }
            Operation::Del => match self.store.group(name) {
                None => {
                    info!("Received delete for non-existent group {}", name);
                    Ok(())
                }
                Some(entry) if entry.prefixes.is_empty() && entry.next_hops.is_empty() => {
                    self.store.remove_group(name);
                    info!("Deleted fine-grained group {}", name);
                    Ok(())
                }
                Some(_) => {
                    info!(
                        "Prefix or member entries are still associated with group {}",
                        name
                    );
                    Err(TaskError::need_retry("group still has dependents"))
                }
            },
        }
    }

    fn handle_prefix_task(&mut self, task: &KeyOpFieldsValues) -> TaskResult<()> {
        let callbacks = self
            .callbacks()
            .map_err(|_| TaskError::need_retry("callbacks not set"))?;
        let prefix: IpPrefix = task
            .key
            .parse()
            .map_err(|_| TaskError::invalid_entry(format!("invalid prefix {}", task.key)))?;
        let vrf = self.config.default_vrf;

        match task.op {
            Operation::Set => {
                if self.store.group_name_for_prefix(&prefix).is_some() {
                    info!("FG_NHG prefix {} already exists", prefix);
                    return Ok(());
                }

                let group_name = task.get_field("FG_NHG").unwrap_or("").to_string();
                if group_name.is_empty() {
                    error!("Received FG_NHG prefix {} with empty group name", prefix);
                    return Err(TaskError::invalid_entry("empty group name"));
                }

                let Some(entry) = self.store.group(&group_name) else {
                    info!("FG_NHG {} not received yet, deferring prefix {}", group_name, prefix);
                    return Err(TaskError::need_retry("group not loaded"));
                };

                if entry.match_mode == FgMatchMode::NexthopBased {
                    info!(
                        "FG_NHG {} is nexthop-based: FG_NHG_PREFIX is a no-op",
                        group_name
                    );
                    return Ok(());
                }

                if let Some(entry) = self.store.group_mut(&group_name) {
                    entry.prefixes.push(prefix);
                }
                self.store.bind_prefix(prefix, &group_name);

                // a pre-existing regular route becomes fine-grained
                if let Some(nhg) = callbacks.regular_route_nhg(vrf, &prefix) {
                    if !callbacks.resubmit_route(vrf, &prefix, &nhg) {
                        info!("Failed to reprogram {} as fine-grained, deferring", prefix);
                        if let Some(entry) = self.store.group_mut(&group_name) {
                            entry.prefixes.retain(|p| p != &prefix);
                        }
                        self.store.unbind_prefix(&prefix);
                        return Err(TaskError::need_retry("route reprogram failed"));
                    }
                }

                info!("FG_NHG prefix {} added to group {}", prefix, group_name);
                Ok(())
            }
            Operation::Del => {
                let Some(group_name) = self.store.group_name_for_prefix(&prefix).cloned() else {
                    info!("FG_NHG prefix {} does not exist, ignoring delete", prefix);
                    return Ok(());
                };

                if let Some(entry) = self.store.group_mut(&group_name) {
                    entry.prefixes.retain(|p| p != &prefix);
                }
                self.store.unbind_prefix(&prefix);

                // revert a synced fine-grained route to regular ECMP
                if let Some(instance) = self.store.instance(vrf, &prefix) {
                    let nhg = instance.nhg_key.clone();
                    if !callbacks.resubmit_route(vrf, &prefix, &nhg) {
                        info!("Failed to revert {} to regular ECMP, deferring", prefix);
                        if let Some(entry) = self.store.group_mut(&group_name) {
                            entry.prefixes.push(prefix);
                        }
                        self.store.bind_prefix(prefix, &group_name);
                        return Err(TaskError::need_retry("route reprogram failed"));
                    }
                    info!("FG_NHG prefix {} reverted to regular ECMP", prefix);
                }

                Ok(())
            }
        }
    }

    async fn handle_member_task(&mut self, task: &KeyOpFieldsValues) -> TaskResult<()> {
        let callbacks = self
            .callbacks()
            .map_err(|_| TaskError::need_retry("callbacks not set"))?;
        let ip: IpAddress = task
            .key
            .parse()
            .map_err(|_| TaskError::invalid_entry(format!("invalid member ip {}", task.key)))?;

        match task.op {
            Operation::Set => {
                let group_name = task.get_field("FG_NHG").unwrap_or("").to_string();
                if group_name.is_empty() {
                    error!("Received FG_NHG member {} with empty group name", ip);
                    return Err(TaskError::invalid_entry("empty group name"));
                }
                let bank: Bank = task
                    .get_field("bank")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let link = task
                    .get_field("link")
                    .filter(|l| !l.is_empty())
                    .map(str::to_string);

                let Some(entry) = self.store.group(&group_name) else {
                    info!("FG_NHG {} not received yet, deferring member {}", group_name, ip);
                    return Err(TaskError::need_retry("group not loaded"));
                };

                if entry.next_hops.contains_key(&ip) {
                    info!("FG_NHG member {} already exists for {}, skipping", ip, group_name);
                    return Ok(());
                }
                let nexthop_based = entry.match_mode == FgMatchMode::NexthopBased;

                let mut member = FgNextHopInfo::new(bank);
                let mut link_oper = PortOperStatus::Up;

                if let Some(link_name) = &link {
                    match callbacks.port_oper_status(link_name) {
                        None => {
                            warn!(
                                "FG_NHG member {} added to {} with non-existent link {}, \
                                 link mapping skipped",
                                ip, group_name, link_name
                            );
                        }
                        Some(status) => {
                            link_oper = status;
                            member.link = Some(link_name.clone());
                            member.link_oper_state = status;
                            if let Some(entry) = self.store.group_mut(&group_name) {
                                entry
                                    .links
                                    .entry(link_name.clone())
                                    .or_default()
                                    .push(ip);
                            }
                            info!("Added link {} to ip {} map", link_name, ip);
                        }
                    }
                }

                if let Some(entry) = self.store.group_mut(&group_name) {
                    entry.next_hops.insert(ip, member);
                }
                if nexthop_based {
                    info!("Added member {} as nexthop-based", ip);
                    self.store.bind_nexthop(ip, &group_name);
                }

                match callbacks.resolve_neighbor(&ip) {
                    None => {
                        info!("Next-hop {} is not resolved yet", ip);
                    }
                    Some(nh) if link_oper.is_up() => {
                        if let Err(e) = self.on_next_hop_up(&nh).await {
                            // unwind the member insertion so a later retry
                            // starts clean
                            if let Some(entry) = self.store.group_mut(&group_name) {
                                let link = entry
                                    .next_hops
                                    .get(&ip)
                                    .and_then(|m| m.link.clone());
                                if let Some(link_name) = link {
                                    entry.remove_link_mapping(&link_name, &ip);
                                }
                                entry.next_hops.remove(&ip);
                            }
                            self.store.unbind_nexthop(&ip);
                            info!("Failing next-hop activation for {}: {}", nh, e);
                            return Err(TaskError::need_retry("next-hop activation failed"));
                        }
                    }
                    Some(_) => {}
                }

                info!("FG_NHG member {} added for group {}", ip, group_name);
                Ok(())
            }
            Operation::Del => {
                if let Some(nh) = callbacks.resolve_neighbor(&ip) {
                    if let Err(e) = self.on_next_hop_down(&nh).await {
                        warn!("Failed to deactivate next-hop {}: {}", nh, e);
                        return Err(TaskError::need_retry("next-hop deactivation failed"));
                    }
                }

                let group_names: Vec<String> = self
                    .store
                    .groups()
                    .filter(|(_, entry)| entry.next_hops.contains_key(&ip))
                    .map(|(name, _)| name.clone())
                    .collect();
                for group_name in group_names {
                    if let Some(entry) = self.store.group_mut(&group_name) {
                        let link = entry.next_hops.get(&ip).and_then(|m| m.link.clone());
                        if let Some(link_name) = link {
                            entry.remove_link_mapping(&link_name, &ip);
                        }
                        entry.next_hops.remove(&ip);
                        info!(
                            "FG_NHG member {} removed from group {}",
                            ip, group_name
                        );
                    }
                }
                self.store.unbind_nexthop(&ip);
                Ok(())
            }
        }
    }
}

/// Materialises the ASIC group for a route: creates the group, sizes the
/// bucket space, computes bank ranges, and installs one member per bucket.
///
/// A failure at any point tears the freshly-created group down and reports
/// the error; the caller retries later.
#[allow(clippy::too_many_arguments)]
async fn create_fg_group(
    config: &FgNhgOrchConfig,
    api: &dyn FineGrainedGroupApi,
    state: &dyn WarmRestartTable,
    callbacks: &dyn FgNhgOrchCallbacks,
    vrf: VirtualRouterOid,
    prefix: &IpPrefix,
    entry: &mut FgNhgEntry,
    instance: &mut FgGroupInstance,
    changes: &[BankMemberChanges],
    nh_oids: &HashMap<NextHopKey, NextHopOid>,
    recovery: Option<&[String]>,
) -> Result<()> {
    if callbacks.nhg_count() >= callbacks.max_nhg_count() {
        debug!(
            "Cannot create group for {}: maximum next-hop group count reached",
            prefix
        );
        return Err(FgNhgError::MaxGroupsReached);
    }

    let group = api.create_group(entry.configured_bucket_size).await?;
    callbacks.inc_nhg_count();
    callbacks.inc_resource(CrmResourceType::NexthopGroup);

    let real_size = if config.simulated_bucket_size {
        entry.configured_bucket_size
    } else {
        match api.group_real_size(group).await {
            Ok(size) => size,
            Err(e) => {
                error!("Failed to query real bucket count for {}: {}", prefix, e);
                if api.remove_group(group).await.is_ok() {
                    callbacks.dec_resource(CrmResourceType::NexthopGroup);
                    callbacks.dec_nhg_count();
                }
                return Err(e.into());
            }
        }
    };
    entry.real_bucket_size = real_size;
    entry.bank_ranges = calculate_bank_hash_bucket_ranges(&entry.members_per_bank(), real_size);

    info!(
        "Created fine-grained group for prefix {} with {} buckets",
        prefix, real_size
    );

    // A checkpoint that no longer matches the provisioned bucket count
    // (or failed to parse) cannot be replayed; assign fresh instead.
    let recovery = recovery.filter(|rows| {
        let usable = rows.len() as u32 == real_size
            && rows.iter().all(|raw| raw.parse::<NextHopKey>().is_ok());
        if !usable {
            warn!(
                "Recovered bucket layout for {} is unusable, assigning fresh",
                prefix
            );
        }
        usable
    });

    let ctx = RebalanceCtx {
        api,
        state,
        callbacks,
        vrf,
        prefix,
        nh_oids,
    };

    match set_new_group_members(&ctx, group, entry, instance, changes, recovery).await {
        Ok(()) => {
            instance.next_hop_id = RouteNextHopId::Group(group);
            Ok(())
        }
        Err(e) => {
            error!("Failed to install group members for {}: {}", prefix, e);

            // tear down whatever was built before the failure
            while let Some(&member) = instance.member_handles.last() {
                if api.remove_group_member(member).await.is_err() {
                    error!("Failed to clean up group member after creation failure");
                    break;
                }
                instance.member_handles.pop();
                callbacks.dec_resource(CrmResourceType::NexthopGroupMember);
            }
            if instance.member_handles.is_empty() && api.remove_group(group).await.is_ok() {
                callbacks.dec_resource(CrmResourceType::NexthopGroup);
                callbacks.dec_nhg_count();
            }

            instance.member_handles.clear();
            instance.bucket_maps.clear();
            instance.active_nexthops.clear();
            instance.inactive_to_active.clear();
            Err(e)
        }
    }
}

/// Populates every bucket of a fresh group, either from the recovered
/// pre-restart layout or by round-robin over each bank's usable members.
async fn set_new_group_members(
    ctx: &RebalanceCtx<'_>,
    group: fgecmp_sai::NextHopGroupOid,
    entry: &FgNhgEntry,
    instance: &mut FgGroupInstance,
    changes: &[BankMemberChanges],
    recovery: Option<&[String]>,
) -> Result<()> {
    instance.ensure_banks(entry.bank_ranges.len());

    for (bank_index, range) in entry.bank_ranges.iter().enumerate() {
        let bank_id = bank_index as Bank;
        let mut source_bank = bank_id;
        instance.inactive_to_active.insert(bank_id, bank_id);

        if changes[bank_index].nhs_to_add.is_empty() {
            // empty bank borrows from the first bank with members to add
            for (active_bank, change) in changes.iter().enumerate() {
                if !change.nhs_to_add.is_empty() {
                    source_bank = active_bank as Bank;
                    instance.inactive_to_active.insert(bank_id, source_bank);
                    break;
                }
            }
            info!(
                "Bank {} of fine-grained next-hops is down for prefix {}",
                bank_id, ctx.prefix
            );
        }

        if changes[source_bank as usize].nhs_to_add.is_empty() {
            // nothing anywhere to install; the retry pass handles this
            info!("Found no next-hops to install for {}, deferring", ctx.prefix);
            return Err(FgNhgError::NoResolvedNextHops);
        }

        for bucket in range.indices() {
            let nh = match recovery {
                Some(recovered) => {
                    let raw = recovered
                        .get(bucket as usize)
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| {
                            FgNhgError::Internal(format!(
                                "recovered layout has no entry for bucket {}",
                                bucket
                            ))
                        })?;
                    let nh: NextHopKey = raw.parse().map_err(|_| {
                        FgNhgError::Internal(format!("malformed recovered next-hop {}", raw))
                    })?;
                    debug!("Recovering next-hop {} at bucket {}", nh, bucket);

                    // a recovered owner from another bank means this bank
                    // was delegated before the restart
                    if let Some(nh_bank) = entry.bank_of(nh.ip_address()) {
                        if nh_bank != bank_id {
                            instance.inactive_to_active.insert(bank_id, nh_bank);
                        }
                    }
                    nh
                }
                None => {
                    let adds = &changes[source_bank as usize].nhs_to_add;
                    adds[bucket as usize % adds.len()].clone()
                }
            };

            let oid = ctx.nh_oid(&nh)?;
            let member = ctx
                .api
                .create_group_member(group, oid, bucket)
                .await
                .map_err(|e| {
                    error!("Failed to create group member at bucket {}: {}", bucket, e);
                    e
                })?;

            set_state_route_entry(ctx.state, ctx.prefix, bucket, &nh);
            instance.bucket_maps[bank_index]
                .entry(nh.clone())
                .or_default()
                .push(bucket);
            instance.activate(nh);
            instance.member_handles.push(member);
            ctx.callbacks.inc_resource(CrmResourceType::NexthopGroupMember);
        }
    }

    Ok(())
}

#[async_trait]
impl Orch for FgNhgOrch {
    fn name(&self) -> &str {
        "FgNhgOrch"
    }

    fn priority(&self) -> i32 {
        5
    }

    async fn do_task(&mut self) {
        if self.callbacks.is_none() {
            debug!("FgNhgOrch: callbacks not set");
            return;
        }

        // group definitions first: prefixes and members depend on them
        for task in self.group_consumer.drain() {
            match self.handle_group_task(&task) {
                Ok(()) => {}
                Err(e) if e.to_status().is_retryable() => self.group_consumer.retry(task),
                Err(e) => warn!("FG_NHG {}: {}", task.key, e),
            }
        }

        for task in self.prefix_consumer.drain() {
            match self.handle_prefix_task(&task) {
                Ok(()) => {}
                Err(e) if e.to_status().is_retryable() => self.prefix_consumer.retry(task),
                Err(e) => warn!("FG_NHG_PREFIX {}: {}", task.key, e),
            }
        }

        for task in self.member_consumer.drain() {
            match self.handle_member_task(&task).await {
                Ok(()) => {}
                Err(e) if e.to_status().is_retryable() => self.member_consumer.retry(task),
                Err(e) => warn!("FG_NHG_MEMBER {}: {}", task.key, e),
            }
        }
    }

    fn bake(&mut self) -> bool {
        self.recovery.load(self.state_table.as_ref());
        true
    }

    fn has_pending_tasks(&self) -> bool {
        self.group_consumer.has_pending()
            || self.prefix_consumer.has_pending()
            || self.member_consumer.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        let mut dump = self.group_consumer.dump();
        dump.extend(self.prefix_consumer.dump());
        dump.extend(self.member_consumer.dump());
        dump
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgecmp_orch_common::InMemoryWarmRestartTable;
    use fgecmp_sai::sim::SimFineGrainedGroupApi;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const VRF: VirtualRouterOid = VirtualRouterOid::from_raw_unchecked(0x300);

    #[derive(Default)]
    struct TestCallbacks {
        neighbors: Mutex<HashMap<NextHopKey, NextHopOid>>,
        rifs: Mutex<HashMap<String, RouterInterfaceOid>>,
        rif_refs: Mutex<HashMap<String, i64>>,
        ports: Mutex<HashMap<String, PortOperStatus>>,
        ref_counts: Mutex<HashMap<NextHopKey, u32>>,
        nhg_count: AtomicUsize,
        resubmit_ok: bool,
    }

    impl TestCallbacks {
        fn new() -> Self {
            Self {
                resubmit_ok: true,
                ..Default::default()
            }
        }

        fn resolve(&self, nh: &NextHopKey, oid: u64) {
            self.neighbors
                .lock()
                .unwrap()
                .insert(nh.clone(), NextHopOid::from_raw(oid).unwrap());
        }
    }

    impl FgNhgOrchCallbacks for TestCallbacks {
        fn has_next_hop(&self, nh: &NextHopKey) -> bool {
            self.neighbors.lock().unwrap().contains_key(nh)
        }

        fn next_hop_id(&self, nh: &NextHopKey) -> Option<NextHopOid> {
            self.neighbors.lock().unwrap().get(nh).copied()
        }

        fn is_next_hop_if_down(&self, _nh: &NextHopKey) -> bool {
            false
        }

        fn increase_next_hop_ref_count(&self, nh: &NextHopKey) {
            *self.ref_counts.lock().unwrap().entry(nh.clone()).or_insert(0) += 1;
        }

        fn decrease_next_hop_ref_count(&self, nh: &NextHopKey) {
            if let Some(count) = self.ref_counts.lock().unwrap().get_mut(nh) {
                *count = count.saturating_sub(1);
            }
        }

        fn resolve_neighbor(&self, ip: &IpAddress) -> Option<NextHopKey> {
            self.neighbors
                .lock()
                .unwrap()
                .keys()
                .find(|nh| nh.ip_address() == ip)
                .cloned()
        }

        fn router_intf_id(&self, alias: &str) -> Option<RouterInterfaceOid> {
            self.rifs.lock().unwrap().get(alias).copied()
        }

        fn increase_router_intf_ref_count(&self, alias: &str) {
            *self.rif_refs.lock().unwrap().entry(alias.to_string()).or_insert(0) += 1;
        }

        fn decrease_router_intf_ref_count(&self, alias: &str) {
            *self.rif_refs.lock().unwrap().entry(alias.to_string()).or_insert(0) -= 1;
        }

        fn port_oper_status(&self, alias: &str) -> Option<PortOperStatus> {
            self.ports.lock().unwrap().get(alias).copied()
        }

        fn nhg_count(&self) -> usize {
            self.nhg_count.load(Ordering::SeqCst)
        }

        fn max_nhg_count(&self) -> usize {
            128
        }

        fn inc_nhg_count(&self) {
            self.nhg_count.fetch_add(1, Ordering::SeqCst);
        }

        fn dec_nhg_count(&self) {
            self.nhg_count.fetch_sub(1, Ordering::SeqCst);
        }

        fn regular_route_nhg(
            &self,
            _vrf: VirtualRouterOid,
            _prefix: &IpPrefix,
        ) -> Option<NextHopGroupKey> {
            None
        }

        fn resubmit_route(
            &self,
            _vrf: VirtualRouterOid,
            _prefix: &IpPrefix,
            _nhg: &NextHopGroupKey,
        ) -> bool {
            self.resubmit_ok
        }

        fn increase_vrf_ref_count(&self, _vrf: VirtualRouterOid) {}
        fn decrease_vrf_ref_count(&self, _vrf: VirtualRouterOid) {}
        fn inc_resource(&self, _resource: CrmResourceType) {}
        fn dec_resource(&self, _resource: CrmResourceType) {}
    }

    fn orch_with_callbacks() -> (FgNhgOrch, Arc<TestCallbacks>, Arc<SimFineGrainedGroupApi>) {
        let api = Arc::new(SimFineGrainedGroupApi::new());
        let state = Arc::new(InMemoryWarmRestartTable::new());
        let mut orch = FgNhgOrch::new(FgNhgOrchConfig::new(VRF), api.clone(), state);
        let callbacks = Arc::new(TestCallbacks::new());
        orch.set_callbacks(callbacks.clone());
        (orch, callbacks, api)
    }

    fn group_set(name: &str, bucket_size: &str, match_mode: Option<&str>) -> KeyOpFieldsValues {
        let mut fvs = vec![("bucket_size".to_string(), bucket_size.to_string())];
        if let Some(mode) = match_mode {
            fvs.push(("match_mode".to_string(), mode.to_string()));
        }
        KeyOpFieldsValues::set(name, fvs)
    }

    fn nh(last: u8, alias: &str) -> NextHopKey {
        NextHopKey::new(Ipv4Addr::new(10, 0, 0, last).into(), alias)
    }

    #[tokio::test]
    async fn test_group_set_and_duplicate() {
        let (mut orch, _callbacks, _api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "30", None));
        orch.do_task().await;
        assert!(orch.store().group("fgnhg_v4").is_some());
        assert_eq!(
            orch.store().group("fgnhg_v4").unwrap().configured_bucket_size,
            30
        );

        // redefinition is ignored
        orch.queue_group_task(group_set("fgnhg_v4", "60", None));
        orch.do_task().await;
        assert_eq!(
            orch.store().group("fgnhg_v4").unwrap().configured_bucket_size,
            30
        );
    }

    #[tokio::test]
    async fn test_group_zero_bucket_size_dropped() {
        let (mut orch, _callbacks, _api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "0", None));
        orch.do_task().await;

        assert!(orch.store().group("fgnhg_v4").is_none());
        // invalid entry is dropped, not retried
        assert!(!orch.has_pending_tasks());
    }

    #[tokio::test]
    async fn test_group_delete_deferred_while_members_exist() {
        let (mut orch, _callbacks, _api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "30", None));
        orch.do_task().await;

        orch.queue_member_task(KeyOpFieldsValues::set(
            "10.0.0.1",
            vec![
                ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
                ("bank".to_string(), "0".to_string()),
            ],
        ));
        orch.do_task().await;

        orch.queue_group_task(KeyOpFieldsValues::del("fgnhg_v4"));
        orch.do_task().await;
        // delete deferred: group still present, task still queued
        assert!(orch.store().group("fgnhg_v4").is_some());
        assert!(orch.has_pending_tasks());

        orch.queue_member_task(KeyOpFieldsValues::del("10.0.0.1"));
        orch.do_task().await;
        // the deferred group delete applies on the next pass, after the
        // member removal has landed
        orch.do_task().await;
        assert!(orch.store().group("fgnhg_v4").is_none());
    }

    #[tokio::test]
    async fn test_prefix_defers_until_group_loaded() {
        let (mut orch, _callbacks, _api) = orch_with_callbacks();

        orch.queue_prefix_task(KeyOpFieldsValues::set(
            "10.1.1.0/24",
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));
        orch.do_task().await;

        let prefix: IpPrefix = "10.1.1.0/24".parse().unwrap();
        assert!(orch.store().group_name_for_prefix(&prefix).is_none());
        assert!(orch.has_pending_tasks());

        orch.queue_group_task(group_set("fgnhg_v4", "30", None));
        orch.do_task().await;
        assert_eq!(
            orch.store().group_name_for_prefix(&prefix).unwrap(),
            "fgnhg_v4"
        );
    }

    #[tokio::test]
    async fn test_prefix_is_noop_for_nexthop_based_group() {
        let (mut orch, _callbacks, _api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "30", Some("nexthop-based")));
        orch.queue_prefix_task(KeyOpFieldsValues::set(
            "10.1.1.0/24",
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));
        orch.do_task().await;

        let prefix: IpPrefix = "10.1.1.0/24".parse().unwrap();
        assert!(orch.store().group_name_for_prefix(&prefix).is_none());
        assert!(!orch.has_pending_tasks());
    }

    #[tokio::test]
    async fn test_member_registers_nexthop_index_for_nexthop_based() {
        let (mut orch, _callbacks, _api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "30", Some("nexthop-based")));
        orch.queue_member_task(KeyOpFieldsValues::set(
            "10.0.0.1",
            vec![
                ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
                ("bank".to_string(), "0".to_string()),
            ],
        ));
        orch.do_task().await;

        let ip: IpAddress = "10.0.0.1".parse().unwrap();
        assert_eq!(orch.store().group_name_for_nexthop(&ip).unwrap(), "fgnhg_v4");
    }

    #[tokio::test]
    async fn test_is_route_fine_grained_route_based() {
        let (mut orch, _callbacks, _api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "30", None));
        orch.queue_prefix_task(KeyOpFieldsValues::set(
            "10.1.1.0/24",
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));
        orch.do_task().await;

        let prefix: IpPrefix = "10.1.1.0/24".parse().unwrap();
        let other: IpPrefix = "10.2.2.0/24".parse().unwrap();
        let nhs: NextHopGroupKey = "10.0.0.1@Ethernet0".parse().unwrap();

        assert!(orch.is_route_fine_grained(VRF, &prefix, &nhs));
        assert!(!orch.is_route_fine_grained(VRF, &other, &nhs));

        // other VRFs are never fine-grained
        let other_vrf = VirtualRouterOid::from_raw(0x999).unwrap();
        assert!(!orch.is_route_fine_grained(other_vrf, &prefix, &nhs));
    }

    #[tokio::test]
    async fn test_is_route_fine_grained_nexthop_based() {
        let (mut orch, _callbacks, _api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "30", Some("nexthop-based")));
        for ip in ["10.0.0.1", "10.0.0.2"] {
            orch.queue_member_task(KeyOpFieldsValues::set(
                ip,
                vec![
                    ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
                    ("bank".to_string(), "0".to_string()),
                ],
            ));
        }
        orch.do_task().await;

        let prefix: IpPrefix = "10.1.1.0/24".parse().unwrap();
        let all_members: NextHopGroupKey =
            "10.0.0.1@Ethernet0,10.0.0.2@Ethernet4".parse().unwrap();
        let mixed: NextHopGroupKey = "10.0.0.1@Ethernet0,10.9.9.9@Ethernet8".parse().unwrap();

        assert!(orch.is_route_fine_grained(VRF, &prefix, &all_members));
        assert!(!orch.is_route_fine_grained(VRF, &prefix, &mixed));
    }

    #[tokio::test]
    async fn test_set_fg_route_materialises_group() {
        let (mut orch, callbacks, api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "6", None));
        orch.queue_prefix_task(KeyOpFieldsValues::set(
            "10.1.1.0/24",
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));
        for (i, ip) in ["10.0.0.1", "10.0.0.2"].iter().enumerate() {
            orch.queue_member_task(KeyOpFieldsValues::set(
                *ip,
                vec![
                    ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
                    ("bank".to_string(), "0".to_string()),
                ],
            ));
            callbacks.resolve(&nh(i as u8 + 1, "Ethernet0"), 0x100 + i as u64);
        }
        orch.do_task().await;

        let prefix: IpPrefix = "10.1.1.0/24".parse().unwrap();
        let nhs: NextHopGroupKey = "10.0.0.1@Ethernet0,10.0.0.2@Ethernet0".parse().unwrap();

        let (next_hop_id, changed) = orch.set_fg_route(VRF, prefix, nhs.clone()).await.unwrap();
        assert!(changed);
        let group = match next_hop_id {
            RouteNextHopId::Group(g) => g,
            other => panic!("expected group id, got {:?}", other),
        };
        assert_eq!(api.member_count(group), 6);

        // identical set is a no-op
        let (_, changed) = orch.set_fg_route(VRF, prefix, nhs).await.unwrap();
        assert!(!changed);

        let instance = orch.store().instance(VRF, &prefix).unwrap();
        assert_eq!(instance.active_nexthops.len(), 2);
        assert_eq!(instance.member_handles.len(), 6);
    }

    #[tokio::test]
    async fn test_set_fg_route_without_resolved_members_points_to_rif() {
        let (mut orch, callbacks, _api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "6", None));
        orch.queue_prefix_task(KeyOpFieldsValues::set(
            "10.1.1.0/24",
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));
        orch.queue_member_task(KeyOpFieldsValues::set(
            "10.0.0.1",
            vec![
                ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
                ("bank".to_string(), "0".to_string()),
            ],
        ));
        orch.do_task().await;

        let rif = RouterInterfaceOid::from_raw(0x600).unwrap();
        callbacks
            .rifs
            .lock()
            .unwrap()
            .insert("Ethernet0".to_string(), rif);

        let prefix: IpPrefix = "10.1.1.0/24".parse().unwrap();
        let nhs: NextHopGroupKey = "10.0.0.1@Ethernet0".parse().unwrap();

        let (next_hop_id, changed) = orch.set_fg_route(VRF, prefix, nhs).await.unwrap();
        assert!(changed);
        assert_eq!(next_hop_id, RouteNextHopId::RouterInterface(rif));
        assert!(orch.store().instance(VRF, &prefix).unwrap().points_to_rif());
        // the interface route holds a router-interface reference
        assert_eq!(
            callbacks.rif_refs.lock().unwrap().get("Ethernet0"),
            Some(&1)
        );

        orch.remove_fg_route(VRF, &prefix).await.unwrap();
        assert_eq!(
            callbacks.rif_refs.lock().unwrap().get("Ethernet0"),
            Some(&0)
        );
    }

    #[tokio::test]
    async fn test_materialisation_failure_tears_down_group() {
        let (mut orch, callbacks, api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "6", None));
        orch.queue_prefix_task(KeyOpFieldsValues::set(
            "10.1.1.0/24",
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));
        orch.queue_member_task(KeyOpFieldsValues::set(
            "10.0.0.1",
            vec![
                ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
                ("bank".to_string(), "0".to_string()),
            ],
        ));
        orch.do_task().await;
        callbacks.resolve(&nh(1, "Ethernet0"), 0x100);

        api.set_fail_member_creates(true);

        let prefix: IpPrefix = "10.1.1.0/24".parse().unwrap();
        let nhs: NextHopGroupKey = "10.0.0.1@Ethernet0".parse().unwrap();
        assert!(orch.set_fg_route(VRF, prefix, nhs.clone()).await.is_err());

        // the partially-built group was destroyed and nothing was synced
        assert_eq!(api.group_count(), 0);
        assert_eq!(callbacks.nhg_count(), 0);
        assert!(orch.store().instance(VRF, &prefix).is_none());

        // a later retry succeeds
        api.set_fail_member_creates(false);
        let (_, changed) = orch.set_fg_route(VRF, prefix, nhs).await.unwrap();
        assert!(changed);
        assert_eq!(api.group_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_fg_route_cleans_up() {
        let (mut orch, callbacks, api) = orch_with_callbacks();

        orch.queue_group_task(group_set("fgnhg_v4", "6", None));
        orch.queue_prefix_task(KeyOpFieldsValues::set(
            "10.1.1.0/24",
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));
        orch.queue_member_task(KeyOpFieldsValues::set(
            "10.0.0.1",
            vec![
                ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
                ("bank".to_string(), "0".to_string()),
            ],
        ));
        orch.do_task().await;
        callbacks.resolve(&nh(1, "Ethernet0"), 0x100);

        let prefix: IpPrefix = "10.1.1.0/24".parse().unwrap();
        let nhs: NextHopGroupKey = "10.0.0.1@Ethernet0".parse().unwrap();
        orch.set_fg_route(VRF, prefix, nhs).await.unwrap();
        assert_eq!(api.group_count(), 1);

        orch.remove_fg_route(VRF, &prefix).await.unwrap();
        assert_eq!(api.group_count(), 0);
        assert_eq!(callbacks.nhg_count(), 0);
        assert!(orch.store().instance(VRF, &prefix).is_none());
        assert_eq!(
            *callbacks
                .ref_counts
                .lock()
                .unwrap()
                .get(&nh(1, "Ethernet0"))
                .unwrap(),
            0
        );
    }
}
