//! fgecmpd entry point.
//!
//! Wires the fine-grained controller to its collaborators and runs the
//! event pump. The southbound here is the in-memory simulator; a hardware
//! deployment substitutes its SAI binding for it.

use clap::Parser;
use fgecmp_orch_common::InMemoryWarmRestartTable;
use fgecmp_sai::sim::SimFineGrainedGroupApi;
use fgecmp_sai::{NextHopOid, RouterInterfaceOid, VirtualRouterOid};
use fgecmp_types::{IpAddress, IpPrefix, PortOperStatus};
use fgecmpd::crm::{CrmOrch, CrmResourceType};
use fgecmpd::daemon::{OrchDaemon, OrchDaemonConfig};
use fgecmpd::fg_nhg::{FgNhgOrch, FgNhgOrchCallbacks, FgNhgOrchConfig};
use fgecmpd::intfs::IntfsOrch;
use fgecmpd::neigh::NeighOrch;
use fgecmpd::ports::PortsOrch;
use fgecmpd::route::{NextHopGroupKey, NextHopKey};
use log::info;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fine-grained ECMP route controller
#[derive(Parser, Debug)]
#[command(name = "fgecmpd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Pump heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_interval: u64,

    /// Maximum number of ASIC next-hop groups
    #[arg(long, default_value = "512")]
    max_nhg_count: usize,

    /// Treat the platform as a simulator (provisioned bucket counts equal
    /// the configured counts)
    #[arg(long)]
    simulator: bool,

    /// Resume from checkpointed state (warm restart)
    #[arg(long)]
    warm_restart: bool,
}

/// Glue between the fine-grained controller and the collaborator Orchs.
struct DaemonCallbacks {
    neigh: Arc<Mutex<NeighOrch>>,
    intfs: Arc<Mutex<IntfsOrch>>,
    ports: Arc<Mutex<PortsOrch>>,
    crm: Arc<Mutex<CrmOrch>>,
    nhg_count: AtomicUsize,
    max_nhg_count: usize,
}

impl FgNhgOrchCallbacks for DaemonCallbacks {
    fn has_next_hop(&self, nh: &NextHopKey) -> bool {
        self.neigh.lock().unwrap().has_next_hop(nh)
    }

    fn next_hop_id(&self, nh: &NextHopKey) -> Option<NextHopOid> {
        self.neigh.lock().unwrap().next_hop_id(nh)
    }

    fn is_next_hop_if_down(&self, nh: &NextHopKey) -> bool {
        self.neigh.lock().unwrap().is_next_hop_if_down(nh)
    }

    fn increase_next_hop_ref_count(&self, nh: &NextHopKey) {
        self.neigh.lock().unwrap().increase_next_hop_ref_count(nh);
    }

    fn decrease_next_hop_ref_count(&self, nh: &NextHopKey) {
        self.neigh.lock().unwrap().decrease_next_hop_ref_count(nh);
    }

    fn resolve_neighbor(&self, ip: &IpAddress) -> Option<NextHopKey> {
        self.neigh.lock().unwrap().resolve_ip(ip).map(|(nh, _)| nh)
    }

    fn router_intf_id(&self, alias: &str) -> Option<RouterInterfaceOid> {
        self.intfs.lock().unwrap().router_intf_id(alias)
    }

    fn increase_router_intf_ref_count(&self, alias: &str) {
        self.intfs.lock().unwrap().increase_ref_count(alias);
    }

    fn decrease_router_intf_ref_count(&self, alias: &str) {
        self.intfs.lock().unwrap().decrease_ref_count(alias);
    }

    fn port_oper_status(&self, alias: &str) -> Option<PortOperStatus> {
        self.ports.lock().unwrap().oper_status(alias)
    }

    fn nhg_count(&self) -> usize {
        self.nhg_count.load(Ordering::SeqCst)
    }

    fn max_nhg_count(&self) -> usize {
        self.max_nhg_count
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
        // route orchestrator integration point; no regular routes are
        // synced in the standalone daemon
        None
    }

    fn resubmit_route(
        &self,
        _vrf: VirtualRouterOid,
        _prefix: &IpPrefix,
        _nhg: &NextHopGroupKey,
    ) -> bool {
        true
    }

    fn increase_vrf_ref_count(&self, _vrf: VirtualRouterOid) {}
    fn decrease_vrf_ref_count(&self, _vrf: VirtualRouterOid) {}

    fn inc_resource(&self, resource: CrmResourceType) {
        self.crm.lock().unwrap().inc_used(resource);
    }

    fn dec_resource(&self, resource: CrmResourceType) {
        self.crm.lock().unwrap().dec_used(resource);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&args.log_level),
    )
    .init();

    info!("Starting fgecmpd");

    let crm = Arc::new(Mutex::new(CrmOrch::new()));
    let neigh = Arc::new(Mutex::new(NeighOrch::new(crm.clone())));
    let intfs = Arc::new(Mutex::new(IntfsOrch::new()));
    let ports = Arc::new(Mutex::new(PortsOrch::new()));

    let callbacks = Arc::new(DaemonCallbacks {
        neigh,
        intfs,
        ports,
        crm,
        nhg_count: AtomicUsize::new(0),
        max_nhg_count: args.max_nhg_count,
    });

    let default_vrf = VirtualRouterOid::from_raw_unchecked(1);
    let mut fg_config = FgNhgOrchConfig::new(default_vrf);
    if args.simulator {
        fg_config = fg_config.with_simulated_bucket_size();
    }

    let api = Arc::new(SimFineGrainedGroupApi::new());
    let state_table = Arc::new(InMemoryWarmRestartTable::new());
    let mut fg_nhg_orch = FgNhgOrch::new(fg_config, api, state_table);
    fg_nhg_orch.set_callbacks(callbacks);

    let mut daemon = OrchDaemon::new(OrchDaemonConfig {
        heartbeat_interval_ms: args.heartbeat_interval,
    });
    daemon.register_orch(Box::new(fg_nhg_orch));

    if args.warm_restart {
        if !daemon.prepare_warm_restart() {
            return ExitCode::FAILURE;
        }
        daemon.finish_warm_restart();
    }

    daemon.run().await;

    ExitCode::SUCCESS
}
