//! Bank rebalancing state machine.
//!
//! All bucket mutation funnels through [`write_bucket`]: one ASIC member
//! rewrite plus one state-table checkpoint per bucket. The algorithms here
//! only decide which buckets move; a failed call aborts the current bank's
//! rebalance and leaves the instance in its last written state, which the
//! checkpoint table mirrors, so the next successful pass converges.
//!
//! Balance invariant: within an active bank of `n` buckets and `k` live
//! next-hops, every next-hop owns `n / k` buckets and exactly `n % k` of
//! them own one more.

use super::orch::{FgNhgError, FgNhgOrchCallbacks, Result};
use super::types::{Bank, BankMemberChanges, BankRange, FgGroupInstance, FgNhgEntry};
use crate::crm::CrmResourceType;
use crate::route::NextHopKey;
use fgecmp_orch_common::WarmRestartTable;
use fgecmp_sai::api::{FineGrainedGroupApi, RouteNextHopId};
use fgecmp_sai::{NextHopOid, VirtualRouterOid};
use log::{info, warn};
use fgecmp_types::IpPrefix;
use std::collections::HashMap;

/// Borrowed collaborators threaded through one rebalance call.
pub(crate) struct RebalanceCtx<'a> {
    pub api: &'a dyn FineGrainedGroupApi,
    pub state: &'a dyn WarmRestartTable,
    pub callbacks: &'a dyn FgNhgOrchCallbacks,
    pub vrf: VirtualRouterOid,
    pub prefix: &'a IpPrefix,
    pub nh_oids: &'a HashMap<NextHopKey, NextHopOid>,
}

impl<'a> RebalanceCtx<'a> {
    pub(crate) fn nh_oid(&self, nh: &NextHopKey) -> Result<NextHopOid> {
        self.nh_oids.get(nh).copied().ok_or_else(|| {
            warn!("No programmed next-hop id for {}", nh);
            FgNhgError::MissingNextHopId(nh.clone())
        })
    }
}

/// Writes one bucket's next-hop to the ASIC and checkpoints it.
pub(crate) async fn write_bucket(
    ctx: &RebalanceCtx<'_>,
    instance: &FgGroupInstance,
    index: u32,
    nh: &NextHopKey,
) -> Result<()> {
    let member = instance
        .member_handles
        .get(index as usize)
        .copied()
        .ok_or_else(|| FgNhgError::Internal(format!("no member handle for bucket {}", index)))?;

    let oid = ctx.nh_oid(nh)?;
    ctx.api.set_member_next_hop(member, oid).await?;

    set_state_route_entry(ctx.state, ctx.prefix, index, nh);
    Ok(())
}

/// Checkpoints one `bucket index -> next-hop` pair under the prefix's row.
pub(crate) fn set_state_route_entry(
    state: &dyn WarmRestartTable,
    prefix: &IpPrefix,
    index: u32,
    nh: &NextHopKey,
) {
    let key = prefix.to_string();
    let mut fvs = state.get(&key).unwrap_or_default();

    // rows are written in bucket order at materialisation, so position
    // equals index for rewrites
    if (fvs.len() as u32) > index {
        fvs[index as usize] = (index.to_string(), nh.to_string());
    } else {
        fvs.push((index.to_string(), nh.to_string()));
    }
    state.set(&key, fvs);
}

fn bank_range(entry: &FgNhgEntry, bank: Bank) -> Result<BankRange> {
    entry.bank_ranges.get(bank as usize).copied().ok_or_else(|| {
        warn!("Bank {} has no bucket range for group {}", bank, entry.name);
        FgNhgError::Internal(format!("missing bucket range for bank {}", bank))
    })
}

/// Dispatches each bank's delta to the matching transition handler.
pub(crate) async fn compute_and_set_bucket_changes(
    ctx: &RebalanceCtx<'_>,
    entry: &FgNhgEntry,
    instance: &mut FgGroupInstance,
    changes: &[BankMemberChanges],
) -> Result<()> {
    instance.ensure_banks(changes.len());

    for bank in 0..changes.len() {
        let change = &changes[bank];
        let bank = bank as Bank;

        if !change.active_nhs.is_empty()
            || (!change.nhs_to_add.is_empty() && !change.nhs_to_del.is_empty())
        {
            set_active_bank_buckets(ctx, entry, instance, bank, bank, changes).await?;
        } else {
            set_inactive_bank_buckets(ctx, entry, instance, bank, changes).await?;
        }
    }

    Ok(())
}

/// Rebalances a bank that stays active across the delta.
///
/// `bank` selects the delta bundle; `target_bank` selects the bucket range
/// and map entry being rewritten. They differ only when an inactive bank's
/// borrowed buckets are rebalanced with its delegate's deltas.
pub(crate) async fn set_active_bank_buckets(
    ctx: &RebalanceCtx<'_>,
    entry: &FgNhgEntry,
    instance: &mut FgGroupInstance,
    bank: Bank,
    target_bank: Bank,
    changes: &[BankMemberChanges],
) -> Result<()> {
    let mut change = changes[bank as usize].clone();
    let range = bank_range(entry, target_bank)?;
    let tb = target_bank as usize;
    instance.ensure_banks(tb + 1);

    let mut add_idx = 0;
    let mut del_idx = 0;

    // Paired swap: a removed next-hop's buckets transfer verbatim to an
    // added one. Fewest possible writes under symmetric churn.
    while del_idx < change.nhs_to_del.len() && add_idx < change.nhs_to_add.len() {
        let del_nh = change.nhs_to_del[del_idx].clone();
        let add_nh = change.nhs_to_add[add_idx].clone();

        let buckets = instance.bucket_maps[tb].get(&del_nh).cloned().ok_or_else(|| {
            warn!("Next-hop {} missing from bucket map of bank {}", del_nh, target_bank);
            FgNhgError::NextHopNotInBucketMap(del_nh.clone())
        })?;

        for &bucket in &buckets {
            write_bucket(ctx, instance, bucket, &add_nh).await?;
        }

        instance.bucket_maps[tb].remove(&del_nh);
        instance.bucket_maps[tb].insert(add_nh.clone(), buckets);
        change.active_nhs.push(add_nh.clone());
        instance.deactivate(&del_nh);
        instance.activate(add_nh);

        del_idx += 1;
        add_idx += 1;
    }

    // After the swap only net deletes OR net adds remain.
    if del_idx < change.nhs_to_del.len() {
        net_delete(ctx, instance, tb, range, &mut change, del_idx).await?;
    }

    if add_idx < change.nhs_to_add.len() {
        net_add(ctx, instance, tb, range, &mut change, add_idx).await?;
    }

    Ok(())
}

/// Spreads removed next-hops' buckets round-robin over the survivors.
async fn net_delete(
    ctx: &RebalanceCtx<'_>,
    instance: &mut FgGroupInstance,
    tb: usize,
    range: BankRange,
    change: &mut BankMemberChanges,
    mut del_idx: usize,
) -> Result<()> {
    if change.active_nhs.is_empty() {
        return Err(FgNhgError::Internal(
            "net delete with no surviving next-hops".to_string(),
        ));
    }

    let num_buckets = range.size();
    let exp_size = num_buckets / change.active_nhs.len() as u32;
    let mut extras = num_buckets % change.active_nhs.len() as u32;

    let mut candidates = change.active_nhs.clone();
    let mut cursor = 0usize;

    while del_idx < change.nhs_to_del.len() {
        let del_nh = change.nhs_to_del[del_idx].clone();
        let buckets = instance.bucket_maps[tb].get(&del_nh).cloned().ok_or_else(|| {
            warn!("Next-hop {} missing from bucket map of bank {}", del_nh, tb);
            FgNhgError::NextHopNotInBucketMap(del_nh.clone())
        })?;

        for &bucket in &buckets {
            // next candidate with room; full ones leave the rotation
            let nh = loop {
                if candidates.is_empty() {
                    warn!("Ran out of round-robin candidates redistributing bucket {}", bucket);
                    return Err(FgNhgError::Internal(
                        "bucket redistribution exhausted candidates".to_string(),
                    ));
                }
                let pos = cursor % candidates.len();
                let cand = candidates[pos].clone();
                let size = instance.bucket_maps[tb].get(&cand).map_or(0, |b| b.len()) as u32;
                let cap = if extras > 0 { exp_size + 1 } else { exp_size };

                if size >= cap {
                    if size > cap {
                        warn!("Unexpected bucket count {} for {}, expected at most {}", size, cand, cap);
                    }
                    if extras > 0 && size >= exp_size + 1 {
                        extras -= 1;
                    }
                    candidates.remove(pos);
                    cursor = pos;
                    continue;
                }
                break cand;
            };

            write_bucket(ctx, instance, bucket, &nh).await?;
            instance.bucket_maps[tb].entry(nh.clone()).or_default().push(bucket);

            let pos = cursor % candidates.len();
            let size = instance.bucket_maps[tb].get(&nh).map_or(0, |b| b.len()) as u32;
            if extras > 0 {
                if size == exp_size + 1 {
                    candidates.remove(pos);
                    cursor = pos;
                    extras -= 1;
                } else {
                    cursor = pos + 1;
                }
            } else if size == exp_size {
                candidates.remove(pos);
                cursor = pos;
            } else {
                cursor = pos + 1;
            }
        }

        instance.bucket_maps[tb].remove(&del_nh);
        instance.deactivate(&del_nh);
        del_idx += 1;
    }

    Ok(())
}

/// Brings new next-hops up to their fair share by stealing buckets from
/// current owners, most recently gained buckets first.
async fn net_add(
    ctx: &RebalanceCtx<'_>,
    instance: &mut FgGroupInstance,
    tb: usize,
    range: BankRange,
    change: &mut BankMemberChanges,
    mut add_idx: usize,
) -> Result<()> {
    let remaining_adds = (change.nhs_to_add.len() - add_idx) as u32;
    let total_nhs = change.active_nhs.len() as u32 + remaining_adds;
    let num_buckets = range.size();
    let exp_size = num_buckets / total_nhs;
    let mut extras = num_buckets % total_nhs;
    let mut num_at_exp = total_nhs - extras;

    while add_idx < change.nhs_to_add.len() {
        let add_nh = change.nhs_to_add[add_idx].clone();
        instance.bucket_maps[tb].entry(add_nh.clone()).or_default();

        let target_size = if num_at_exp > 0 {
            num_at_exp -= 1;
            exp_size
        } else {
            extras = extras.saturating_sub(1);
            exp_size + 1
        };

        if target_size == 0 {
            warn!(
                "Bank has fewer buckets than members; cannot grant any to {}",
                add_nh
            );
            instance.bucket_maps[tb].remove(&add_nh);
            return Err(FgNhgError::InsufficientBuckets(add_nh));
        }

        let mut cursor = 0usize;
        while (instance.bucket_maps[tb].get(&add_nh).map_or(0, |b| b.len()) as u32) < target_size {
            if change.active_nhs.is_empty() {
                warn!("Ran out of donors while granting buckets to {}", add_nh);
                return Err(FgNhgError::Internal(
                    "bucket grant exhausted donors".to_string(),
                ));
            }

            let pos = cursor % change.active_nhs.len();
            let donor = change.active_nhs[pos].clone();

            let donor_size = instance.bucket_maps[tb].get(&donor).map_or(0, |b| b.len());
            if donor_size <= 1 {
                // signals the configured bucket count cannot cover the
                // member cardinality
                warn!(
                    "Next-hop {} has {} buckets, either bucket count is too small or state drifted",
                    donor, donor_size
                );
                return Err(FgNhgError::InsufficientBuckets(donor));
            }

            let stolen = *instance.bucket_maps[tb]
                .get(&donor)
                .and_then(|b| b.last())
                .ok_or_else(|| FgNhgError::NextHopNotInBucketMap(donor.clone()))?;

            write_bucket(ctx, instance, stolen, &add_nh).await?;

            if let Some(buckets) = instance.bucket_maps[tb].get_mut(&donor) {
                buckets.pop();
            }
            instance.bucket_maps[tb].entry(add_nh.clone()).or_default().push(stolen);

            let donor_size = instance.bucket_maps[tb].get(&donor).map_or(0, |b| b.len()) as u32;
            if extras > 0 {
                if donor_size == exp_size + 1 {
                    change.active_nhs.remove(pos);
                    cursor = pos;
                    extras -= 1;
                } else {
                    if donor_size < exp_size {
                        warn!("Unexpected bucket count {} for donor {}", donor_size, donor);
                    }
                    cursor = pos + 1;
                }
            } else if donor_size == exp_size {
                change.active_nhs.remove(pos);
                cursor = pos;
            } else {
                if donor_size < exp_size {
                    warn!("Unexpected bucket count {} for donor {}", donor_size, donor);
                }
                cursor = pos + 1;
            }
        }

        instance.activate(add_nh);
        add_idx += 1;
    }

    Ok(())
}

/// Handles banks with no pre-delta live members (and active banks whose
/// last members left).
pub(crate) async fn set_inactive_bank_buckets(
    ctx: &RebalanceCtx<'_>,
    entry: &FgNhgEntry,
    instance: &mut FgGroupInstance,
    bank: Bank,
    changes: &[BankMemberChanges],
) -> Result<()> {
    let change = &changes[bank as usize];

    if !change.nhs_to_add.is_empty() {
        // inactive bank comes back up: reclaim its whole range
        let range = bank_range(entry, bank)?;
        let adds = change.nhs_to_add.clone();
        instance.ensure_banks(bank as usize + 1);
        instance.bucket_maps[bank as usize].clear();

        for (position, bucket) in range.indices().enumerate() {
            let nh = adds[position % adds.len()].clone();
            write_bucket(ctx, instance, bucket, &nh).await?;
            instance.bucket_maps[bank as usize]
                .entry(nh.clone())
                .or_default()
                .push(bucket);
            instance.activate(nh);
        }

        instance.inactive_to_active.insert(bank, bank);
        info!(
            "Bank {} of fine-grained next-hops is up for prefix {}",
            bank, ctx.prefix
        );
    } else if !change.nhs_to_del.is_empty() {
        // active bank goes down: hand its range to another bank
        set_inactive_bank_to_next_active(ctx, entry, instance, bank, changes).await?;

        for nh in &change.nhs_to_del {
            instance.deactivate(nh);
        }
        info!(
            "Bank {} of fine-grained next-hops is down for prefix {}",
            bank, ctx.prefix
        );
    } else {
        // bank stays inactive: keep its borrowed buckets balanced
        match instance.inactive_to_active.get(&bank).copied() {
            Some(delegate)
                if !changes
                    .get(delegate as usize)
                    .map_or(true, |c| c.active_nhs.is_empty()) =>
            {
                set_active_bank_buckets(ctx, entry, instance, delegate, bank, changes).await?;
            }
            _ => {
                set_inactive_bank_to_next_active(ctx, entry, instance, bank, changes).await?;
            }
        }
    }

    Ok(())
}

/// Delegates an inactive bank's range to the lowest-indexed bank with live
/// members; degrades the route to its router interface when none exists.
pub(crate) async fn set_inactive_bank_to_next_active(
    ctx: &RebalanceCtx<'_>,
    entry: &FgNhgEntry,
    instance: &mut FgGroupInstance,
    bank: Bank,
    changes: &[BankMemberChanges],
) -> Result<()> {
    for (new_bank, candidate) in changes.iter().enumerate() {
        if candidate.active_nhs.is_empty() && candidate.nhs_to_add.is_empty() {
            continue;
        }

        let range = bank_range(entry, bank)?;
        instance.ensure_banks(bank as usize + 1);
        instance.bucket_maps[bank as usize].clear();
        instance.inactive_to_active.insert(bank, new_bank as Bank);

        // collated set of members that will be live in the delegate
        let mut live = candidate.active_nhs.clone();
        live.extend(candidate.nhs_to_add.iter().cloned());

        for (position, bucket) in range.indices().enumerate() {
            let nh = live[position % live.len()].clone();
            write_bucket(ctx, instance, bucket, &nh).await?;
            instance.bucket_maps[bank as usize]
                .entry(nh)
                .or_default()
                .push(bucket);
        }

        return Ok(());
    }

    // No bank has live members left: degrade to a router-interface route
    // so the kernel can drive neighbour re-resolution. Reported as a
    // notice; traffic is intentionally handed to the interface.
    info!(
        "All banks of fine-grained next-hops are down for prefix {}",
        ctx.prefix
    );

    if !instance.points_to_rif() {
        let alias = instance
            .nhg_key
            .iter()
            .next()
            .map(|nh| nh.alias().to_string())
            .ok_or_else(|| FgNhgError::Internal("degrading instance with empty key".to_string()))?;

        let rif = ctx.callbacks.router_intf_id(&alias).ok_or_else(|| {
            info!("Failed to get router interface next hop for {}", alias);
            FgNhgError::RifNotFound(alias.clone())
        })?;

        ctx.api
            .set_route_next_hop(ctx.vrf, ctx.prefix, RouteNextHopId::RouterInterface(rif))
            .await?;

        remove_group_objects(ctx.api, ctx.callbacks, instance).await?;

        ctx.state.del(&ctx.prefix.to_string());
        ctx.callbacks.increase_router_intf_ref_count(&alias);
        instance.clear_to_rif(rif, alias);
    }

    Ok(())
}

/// Destroys a group's ASIC members and the group itself, adjusting the
/// resource counters. Members are removed tail-first so a failed call can
/// resume where it stopped.
pub(crate) async fn remove_group_objects(
    api: &dyn FineGrainedGroupApi,
    callbacks: &dyn FgNhgOrchCallbacks,
    instance: &mut FgGroupInstance,
) -> Result<()> {
    let group = instance
        .group_id()
        .ok_or_else(|| FgNhgError::Internal("no group handle to remove".to_string()))?;

    while let Some(&member) = instance.member_handles.last() {
        api.remove_group_member(member).await?;
        instance.member_handles.pop();
        callbacks.dec_resource(CrmResourceType::NexthopGroupMember);
    }

    api.remove_group(group).await?;
    callbacks.dec_resource(CrmResourceType::NexthopGroup);
    callbacks.dec_nhg_count();

    Ok(())
}
