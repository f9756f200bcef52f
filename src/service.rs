//! Async driver for the ND engine
//!
//! [`NdService`] owns an [`NdEngine`] inside a tokio task. Callers talk to it
//! through a cloneable [`NdHandle`]; every action the engine produces is
//! handed to a [`LinkOutput`] once the engine call has returned.

use crate::nd::{
    NdAction, NdEngine, NdMessage, NeighborAdvertisement, NeighborInfo, NeighborSolicitation,
    Prefix, PrefixInfo, RouteId, RouterInfo,
};
use crate::protocol::{IfIndex, Ipv6Packet, MacAddr};
use crate::{Error, Result};
use std::net::Ipv6Addr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

const COMMAND_QUEUE: usize = 256;

/// Carries out engine actions: frame transmission, ICMPv6 errors,
/// multicast membership and routing socket messages.
pub trait LinkOutput: Send + 'static {
    fn execute(&mut self, action: NdAction);
}

enum Command {
    Output {
        ifindex: IfIndex,
        packet: Ipv6Packet,
        route: Option<RouteId>,
        reply: oneshot::Sender<Result<()>>,
    },
    CacheLladdr {
        ifindex: IfIndex,
        from: Ipv6Addr,
        lladdr: Option<MacAddr>,
        msg: NdMessage,
    },
    NeighborAdvert {
        ifindex: IfIndex,
        na: NeighborAdvertisement,
    },
    NeighborSolicit {
        ifindex: IfIndex,
        source: Ipv6Addr,
        ns: NeighborSolicitation,
    },
    NudHint {
        addr: Ipv6Addr,
        ifindex: IfIndex,
        force: bool,
    },
    AddDefaultRouter {
        addr: Ipv6Addr,
        ifindex: IfIndex,
        flags: u8,
        lifetime: Duration,
    },
    AddPrefix(Prefix),
    AddStaticNeighbor {
        addr: Ipv6Addr,
        ifindex: IfIndex,
        mac: MacAddr,
        reply: oneshot::Sender<Result<()>>,
    },
    AddProxyNeighbor {
        addr: Ipv6Addr,
        ifindex: IfIndex,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveNeighbor {
        addr: Ipv6Addr,
        ifindex: IfIndex,
    },
    Neighbors(oneshot::Sender<Vec<NeighborInfo>>),
    DefaultRouters(oneshot::Sender<Vec<RouterInfo>>),
    Prefixes(oneshot::Sender<Vec<PrefixInfo>>),
}

/// Engine task state.
pub struct NdService<L: LinkOutput> {
    engine: NdEngine,
    link: L,
    commands: mpsc::Receiver<Command>,
}

impl<L: LinkOutput> NdService<L> {
    /// Starts the engine task. It runs until every handle is dropped.
    pub fn spawn(engine: NdEngine, link: L) -> (NdHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let service = Self {
            engine,
            link,
            commands: rx,
        };
        let task = tokio::spawn(service.run());
        (NdHandle { tx }, task)
    }

    async fn run(mut self) {
        info!("ND service started");
        loop {
            let deadline = self.engine.next_deadline();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = wait_for(deadline) => {
                    let actions = self.engine.handle_timers(now());
                    self.dispatch(actions);
                }
            }
        }
        info!("ND service stopped");
    }

    fn handle(&mut self, cmd: Command) {
        let now = now();
        let actions = match cmd {
            Command::Output {
                ifindex,
                packet,
                route,
                reply,
            } => {
                let result = self.engine.output(now, ifindex, packet, route);
                let (actions, result) = match result {
                    Ok(actions) => (actions, Ok(())),
                    Err(e) => (self.engine.take_actions(), Err(e)),
                };
                let _ = reply.send(result);
                actions
            }
            Command::CacheLladdr {
                ifindex,
                from,
                lladdr,
                msg,
            } => self.engine.cache_lladdr(now, ifindex, &from, lladdr, msg),
            Command::NeighborAdvert { ifindex, na } => {
                self.engine.process_neighbor_advertisement(now, ifindex, &na)
            }
            Command::NeighborSolicit { ifindex, source, ns } => {
                self.engine
                    .process_neighbor_solicitation(now, ifindex, source, &ns)
            }
            Command::NudHint {
                addr,
                ifindex,
                force,
            } => self.engine.nud_hint(now, &addr, ifindex, force),
            Command::AddDefaultRouter {
                addr,
                ifindex,
                flags,
                lifetime,
            } => self
                .engine
                .add_default_router(now, addr, ifindex, flags, lifetime),
            Command::AddPrefix(prefix) => self.engine.add_prefix(now, prefix),
            Command::AddStaticNeighbor {
                addr,
                ifindex,
                mac,
                reply,
            } => {
                let result = self.engine.add_static_neighbor(now, addr, ifindex, mac);
                self.reply_with_actions(result, reply)
            }
            Command::AddProxyNeighbor {
                addr,
                ifindex,
                reply,
            } => {
                let result = self.engine.add_proxy_neighbor(now, addr, ifindex);
                self.reply_with_actions(result, reply)
            }
            Command::RemoveNeighbor { addr, ifindex } => {
                self.engine.remove_neighbor(&addr, ifindex)
            }
            Command::Neighbors(reply) => {
                let _ = reply.send(self.engine.neighbors(now));
                Vec::new()
            }
            Command::DefaultRouters(reply) => {
                let _ = reply.send(self.engine.default_routers(now));
                Vec::new()
            }
            Command::Prefixes(reply) => {
                let _ = reply.send(self.engine.prefixes(now));
                Vec::new()
            }
        };
        self.dispatch(actions);
    }

    fn reply_with_actions(
        &mut self,
        result: Result<Vec<NdAction>>,
        reply: oneshot::Sender<Result<()>>,
    ) -> Vec<NdAction> {
        match result {
            Ok(actions) => {
                let _ = reply.send(Ok(()));
                actions
            }
            Err(e) => {
                debug!(error = %e, "request rejected");
                let _ = reply.send(Err(e));
                self.engine.take_actions()
            }
        }
    }

    fn dispatch(&mut self, actions: Vec<NdAction>) {
        for action in actions {
            trace!(?action, "dispatch");
            self.link.execute(action);
        }
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn wait_for(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running [`NdService`].
#[derive(Debug, Clone)]
pub struct NdHandle {
    tx: mpsc::Sender<Command>,
}

impl NdHandle {
    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| Error::ServiceClosed)
    }

    async fn request<T>(&self, cmd: Command, rx: oneshot::Receiver<T>) -> Result<T> {
        self.send(cmd).await?;
        rx.await.map_err(|_| Error::ServiceClosed)
    }

    /// Sends `packet`, resolving its next hop first if needed.
    pub async fn output(
        &self,
        ifindex: IfIndex,
        packet: Ipv6Packet,
        route: Option<RouteId>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Output {
            ifindex,
            packet,
            route,
            reply,
        };
        self.request(cmd, rx).await?
    }

    pub async fn cache_lladdr(
        &self,
        ifindex: IfIndex,
        from: Ipv6Addr,
        lladdr: Option<MacAddr>,
        msg: NdMessage,
    ) -> Result<()> {
        self.send(Command::CacheLladdr {
            ifindex,
            from,
            lladdr,
            msg,
        })
        .await
    }

    pub async fn neighbor_advertisement(
        &self,
        ifindex: IfIndex,
        na: NeighborAdvertisement,
    ) -> Result<()> {
        self.send(Command::NeighborAdvert { ifindex, na }).await
    }

    pub async fn neighbor_solicitation(
        &self,
        ifindex: IfIndex,
        source: Ipv6Addr,
        ns: NeighborSolicitation,
    ) -> Result<()> {
        self.send(Command::NeighborSolicit {
            ifindex,
            source,
            ns,
        })
        .await
    }

    /// Upper-layer reachability confirmation.
    pub async fn nud_hint(&self, addr: Ipv6Addr, ifindex: IfIndex, force: bool) -> Result<()> {
        self.send(Command::NudHint {
            addr,
            ifindex,
            force,
        })
        .await
    }

    pub async fn add_default_router(
        &self,
        addr: Ipv6Addr,
        ifindex: IfIndex,
        flags: u8,
        lifetime: Duration,
    ) -> Result<()> {
        self.send(Command::AddDefaultRouter {
            addr,
            ifindex,
            flags,
            lifetime,
        })
        .await
    }

    pub async fn add_prefix(&self, prefix: Prefix) -> Result<()> {
        self.send(Command::AddPrefix(prefix)).await
    }

    pub async fn add_static_neighbor(
        &self,
        addr: Ipv6Addr,
        ifindex: IfIndex,
        mac: MacAddr,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::AddStaticNeighbor {
            addr,
            ifindex,
            mac,
            reply,
        };
        self.request(cmd, rx).await?
    }

    pub async fn add_proxy_neighbor(&self, addr: Ipv6Addr, ifindex: IfIndex) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::AddProxyNeighbor {
            addr,
            ifindex,
            reply,
        };
        self.request(cmd, rx).await?
    }

    pub async fn remove_neighbor(&self, addr: Ipv6Addr, ifindex: IfIndex) -> Result<()> {
        self.send(Command::RemoveNeighbor { addr, ifindex }).await
    }

    /// Neighbor cache snapshot, most recently used first.
    pub async fn neighbors(&self) -> Result<Vec<NeighborInfo>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Neighbors(reply), rx).await
    }

    pub async fn default_routers(&self) -> Result<Vec<RouterInfo>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::DefaultRouters(reply), rx).await
    }

    pub async fn prefixes(&self) -> Result<Vec<PrefixInfo>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Prefixes(reply), rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nd::{IfFlags, Interface, InterfaceAddress, NdParams, NeighborState, UnreachableReason};
    use crate::protocol::LinkKind;
    use crate::telemetry::MetricsRegistry;
    use assert_matches::assert_matches;
    use std::sync::{Arc, Mutex};

    const ETH0: IfIndex = 1;
    const MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const PEER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x05]);

    #[derive(Clone, Default)]
    struct RecordingLink(Arc<Mutex<Vec<NdAction>>>);

    impl RecordingLink {
        fn take(&self) -> Vec<NdAction> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl LinkOutput for RecordingLink {
        fn execute(&mut self, action: NdAction) {
            self.0.lock().unwrap().push(action);
        }
    }

    fn start() -> (NdHandle, RecordingLink) {
        let now = now();
        let mut engine = NdEngine::new(NdParams::default(), Arc::new(MetricsRegistry::new()), now);
        let mut iface = Interface::new(ETH0, "eth0", LinkKind::Ethernet, MAC);
        iface.nd.flags.remove(IfFlags::AUTO_LINKLOCAL);
        engine.add_interface(now, iface);
        engine
            .add_address(
                now,
                InterfaceAddress::manual("2001:db8:1::1".parse().unwrap(), 64, ETH0),
            )
            .unwrap();
        let link = RecordingLink::default();
        let (handle, _task) = NdService::spawn(engine, link.clone());
        (handle, link)
    }

    fn packet(dst: &str) -> Ipv6Packet {
        Ipv6Packet::new(
            "2001:db8:1::1".parse().unwrap(),
            dst.parse().unwrap(),
            17,
            vec![0; 48],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_solicits_then_reports_unreachable() {
        let (handle, link) = start();

        handle.output(ETH0, packet("2001:db8:1::5"), None).await.unwrap();
        assert_matches!(
            link.take().as_slice(),
            [NdAction::SendSolicitation { link_dst: None, .. }]
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        // Round trip so every timer has been handled
        let neighbors = handle.neighbors().await.unwrap();
        let dst: Ipv6Addr = "2001:db8:1::5".parse().unwrap();
        assert!(neighbors.iter().all(|n| n.address != dst));

        let actions = link.take();
        let retries = actions
            .iter()
            .filter(|a| matches!(a, NdAction::SendSolicitation { .. }))
            .count();
        assert_eq!(retries, 2);
        assert_matches!(
            actions.last(),
            Some(NdAction::ReportUnreachable {
                reason: UnreachableReason::AddressUnreachable,
                ..
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertisement_releases_held_packet() {
        let (handle, link) = start();
        let target: Ipv6Addr = "2001:db8:1::5".parse().unwrap();

        handle.output(ETH0, packet("2001:db8:1::5"), None).await.unwrap();
        link.take();

        let na = NeighborAdvertisement {
            target,
            link_addr: Some(PEER_MAC),
            router: false,
            solicited: true,
            override_flag: true,
        };
        handle.neighbor_advertisement(ETH0, na).await.unwrap();

        let neighbors = handle.neighbors().await.unwrap();
        let entry = neighbors.iter().find(|n| n.address == target).unwrap();
        assert_eq!(entry.state, NeighborState::Reachable);
        assert_eq!(entry.link_addr, Some(PEER_MAC));
        assert_matches!(
            link.take().as_slice(),
            [NdAction::Transmit { link_dst: Some(mac), .. }] if *mac == PEER_MAC
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_error_is_returned() {
        let (handle, _link) = start();
        let result = handle.output(9, packet("2001:db8:1::5"), None).await;
        assert_matches!(result, Err(Error::InterfaceNotFound { ifindex: 9 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_neighbor_via_handle() {
        let (handle, _link) = start();
        let addr: Ipv6Addr = "2001:db8:1::20".parse().unwrap();

        handle.add_static_neighbor(addr, ETH0, PEER_MAC).await.unwrap();
        let result = handle.add_proxy_neighbor(addr, 7).await;
        assert_matches!(result, Err(Error::InterfaceNotFound { ifindex: 7 }));

        let neighbors = handle.neighbors().await.unwrap();
        assert!(neighbors.iter().any(|n| n.address == addr && n.permanent));

        handle.remove_neighbor(addr, ETH0).await.unwrap();
        let neighbors = handle.neighbors().await.unwrap();
        assert!(neighbors.iter().all(|n| n.address != addr));
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_expires_on_timer() {
        let (handle, _link) = start();
        let router: Ipv6Addr = "fe80::1".parse().unwrap();

        handle
            .add_default_router(router, ETH0, 0, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(handle.default_routers().await.unwrap().len(), 1);

        // Past the lifetime plus one prune interval
        tokio::time::sleep(Duration::from_secs(32)).await;
        assert!(handle.default_routers().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_service() {
        let (handle, _link) = start();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let closed = NdHandle { tx };
        assert_matches!(
            closed.nud_hint("2001:db8:1::5".parse().unwrap(), ETH0, false).await,
            Err(Error::ServiceClosed)
        );
        // The live handle is unaffected
        assert!(handle.prefixes().await.unwrap().iter().all(|p| p.prefix_len <= 128));
    }
}
