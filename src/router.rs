//! Per-router process.
//!
//! Every router runs as one tokio task that owns its table, neighbor links and
//! timers. Packets arrive through a bounded mailbox that is only drained while
//! the router accepts traffic; everything else (wiring, start/stop, traffic
//! injection, status queries and the periodic tick) goes through an unbounded
//! control channel that is always drained, so state is only ever touched from
//! the router's own task. Periodic table broadcasts are handed back to the
//! update duty, which waits on full neighbor mailboxes in the router's stead.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::SimulationConfig;
use crate::packet::{BROADCAST, Packet, Payload, SINGLE_MASK};
use crate::protocol::{Command, RipMessage};
use crate::routing_table::{RouteEntry, RoutingTable};

/// Observer called with the packet that triggered it.
///
/// Listeners run synchronously on the router's own task. They must not block,
/// and must never wait on a router (its mailbox or its handle) since that task
/// may be the one they are waiting for. One listener may be shared by several
/// routers and is then called concurrently.
pub type PacketListener = Arc<dyn Fn(&Packet) + Send + Sync>;

enum RouterControl {
    Connect {
        address: Ipv4Addr,
        mailbox: mpsc::Sender<Packet>,
    },
    Start,
    SetAccepting(bool),
    ReceiveListener(PacketListener),
    ForwardListener(PacketListener),
    Send {
        packet: Packet,
        reply: oneshot::Sender<bool>,
    },
    Status(oneshot::Sender<RouterStatus>),
    Tick(oneshot::Sender<Outbound>),
}

/// Packets paired with the neighbor mailbox they are bound for.
type Outbound = Vec<(mpsc::Sender<Packet>, Packet)>;

#[derive(Debug, Clone)]
pub struct RouterStatus {
    pub name: String,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub accepting: bool,
    pub running: bool,
    pub neighbors: Vec<Ipv4Addr>,
    pub table: Vec<RouteEntry>,
}

/// Handle on a running router process. Cheap to clone.
#[derive(Clone)]
pub struct Router {
    name: String,
    address: Ipv4Addr,
    mask: Ipv4Addr,
    mailbox: mpsc::Sender<Packet>,
    control: mpsc::UnboundedSender<RouterControl>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("mask", &self.mask)
            .finish()
    }
}

impl Router {
    /// Creates a stopped router and spawns its process on the current tokio
    /// runtime. It holds no routes and ignores its mailbox until started.
    pub fn new(name: impl Into<String>, address: Ipv4Addr, mask: Ipv4Addr, config: &SimulationConfig) -> Self {
        let name = name.into();
        let (mailbox, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();

        let process = RouterProcess {
            name: name.clone(),
            address,
            mask,
            config: config.clone(),
            table: RoutingTable::new(address),
            neighbors: HashMap::new(),
            last_heard: HashMap::new(),
            accepting: false,
            running: false,
            countdown: config.next_countdown(),
            on_receive: None,
            on_forward: None,
            control: control.downgrade(),
        };
        tokio::spawn(process.run(mailbox_rx, control_rx));

        Self {
            name,
            address,
            mask,
            mailbox,
            control,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn mask(&self) -> Ipv4Addr {
        self.mask
    }

    /// Starts accepting packets, asks every neighbor for its table and, the
    /// first time only, launches the periodic update duty.
    pub fn start(&self) {
        self.command(RouterControl::Start);
    }

    /// Pauses or resumes packet processing. Queued packets are kept.
    pub fn set_accepting(&self, accepting: bool) {
        self.command(RouterControl::SetAccepting(accepting));
    }

    pub fn add_receive_listener<F>(&self, listener: F)
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.command(RouterControl::ReceiveListener(Arc::new(listener)));
    }

    pub fn add_forward_listener<F>(&self, listener: F)
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.command(RouterControl::ForwardListener(Arc::new(listener)));
    }

    /// Originates `packet` from this router.
    ///
    /// Broadcasts are flooded to every neighbor and always succeed. Anything
    /// else succeeds only if a usable route exists. Waits while the next
    /// mailbox is full.
    pub async fn send(&self, packet: Packet) -> bool {
        let (reply, response) = oneshot::channel();
        if self.control.send(RouterControl::Send { packet, reply }).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    pub async fn status(&self) -> Option<RouterStatus> {
        let (reply, response) = oneshot::channel();
        self.control.send(RouterControl::Status(reply)).ok()?;
        response.await.ok()
    }

    pub async fn table(&self) -> Vec<RouteEntry> {
        self.status().await.map(|status| status.table).unwrap_or_default()
    }

    fn command(&self, command: RouterControl) {
        if self.control.send(command).is_err() {
            debug!("Router {} is no longer running", self.address);
        }
    }
}

/// Links two routers directly. Connecting an already linked pair, or a
/// router to itself, changes nothing.
pub fn connect(a: &Router, b: &Router) {
    if a.address == b.address {
        return;
    }
    a.command(RouterControl::Connect {
        address: b.address,
        mailbox: b.mailbox.clone(),
    });
    b.command(RouterControl::Connect {
        address: a.address,
        mailbox: a.mailbox.clone(),
    });
}

struct RouterProcess {
    name: String,
    address: Ipv4Addr,
    mask: Ipv4Addr,
    config: SimulationConfig,
    table: RoutingTable,
    neighbors: HashMap<Ipv4Addr, mpsc::Sender<Packet>>,
    last_heard: HashMap<Ipv4Addr, Instant>,
    accepting: bool,
    running: bool,
    countdown: u32,
    on_receive: Option<PacketListener>,
    on_forward: Option<PacketListener>,
    // weak so that dropping every handle of a never started router ends it
    control: mpsc::WeakUnboundedSender<RouterControl>,
}

impl RouterProcess {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Packet>, mut control: mpsc::UnboundedReceiver<RouterControl>) {
        loop {
            tokio::select! {
                biased;
                command = control.recv() => match command {
                    Some(command) => self.handle_control(command).await,
                    None => break,
                },
                Some(packet) = mailbox.recv(), if self.accepting => {
                    self.handle_packet(packet).await;
                }
            }
        }
        debug!("Router {} process stopped", self.address);
    }

    async fn handle_control(&mut self, command: RouterControl) {
        match command {
            RouterControl::Connect { address, mailbox } => self.add_neighbor(address, mailbox),
            RouterControl::Start => self.start().await,
            RouterControl::SetAccepting(accepting) => {
                info!("Router {} {}", self.address, if accepting { "resumed" } else { "paused" });
                self.accepting = accepting;
            }
            RouterControl::ReceiveListener(listener) => self.on_receive = Some(listener),
            RouterControl::ForwardListener(listener) => self.on_forward = Some(listener),
            RouterControl::Send { packet, reply } => {
                let sent = self.send(packet).await;
                let _ = reply.send(sent);
            }
            RouterControl::Status(reply) => {
                let _ = reply.send(self.status());
            }
            RouterControl::Tick(reply) => {
                let _ = reply.send(self.on_tick());
            }
        }
    }

    fn add_neighbor(&mut self, address: Ipv4Addr, mailbox: mpsc::Sender<Packet>) {
        if address == self.address {
            return;
        }
        if self.neighbors.insert(address, mailbox).is_none() {
            info!("Router {} connected to {}", self.address, address);
        }
        self.last_heard.insert(address, Instant::now());
        self.table.add_entry(address, SINGLE_MASK, 1, address);
    }

    async fn start(&mut self) {
        self.accepting = true;
        if !self.running {
            self.running = true;
            info!("Starting router {} ({})", self.name, self.address);
            if let Some(control) = self.control.upgrade() {
                spawn_update_duty(control, self.config.tick());
            }
        }
        self.request_whole_table().await;
    }

    async fn handle_packet(&mut self, mut packet: Packet) {
        if packet.is_protocol() {
            self.handle_protocol(&packet).await;
            self.refresh_neighbor(packet.sender);
        } else if packet.is_broadcast() || packet.destination == self.address {
            if let Some(listener) = &self.on_receive {
                listener(&packet);
            }
        } else if self.forward(&packet).await {
            if let Some(listener) = &self.on_forward {
                listener(&packet);
            }
        }

        if packet.is_broadcast() {
            packet.hop_budget = packet.hop_budget.saturating_sub(1);
            if packet.hop_budget > 0 {
                let arrived_from = packet.sender;
                self.flood(packet, Some(arrived_from)).await;
            }
        }
    }

    async fn handle_protocol(&mut self, packet: &Packet) {
        let Payload::Rip(message) = &packet.payload else {
            debug!("Router {} ignoring non-RIP payload on the protocol port", self.address);
            return;
        };
        let sender = packet.sender;

        match message.command {
            Command::Request if message.is_whole_table_request() => {
                self.send_whole_table(sender).await;
            }
            Command::Request => {
                debug!("Router {} ignoring partial table request from {}", self.address, sender);
            }
            Command::Response => {
                for advertisement in message.entries() {
                    self.table.add_entry(
                        advertisement.address,
                        advertisement.mask,
                        advertisement.metric.saturating_add(1),
                        sender,
                    );
                }
            }
        }
    }

    // A neighbor that speaks is reachable again, whatever its routes say.
    fn refresh_neighbor(&mut self, sender: Ipv4Addr) {
        if let Some(heard) = self.last_heard.get_mut(&sender) {
            *heard = Instant::now();
            self.table.add_entry(sender, SINGLE_MASK, 1, sender);
        }
    }

    // The update duty delivers what this returns, so a full neighbor mailbox
    // stalls the timer and never the router itself.
    fn on_tick(&mut self) -> Outbound {
        if !self.accepting {
            return Vec::new();
        }
        if self.countdown > 0 {
            self.countdown -= 1;
            return Vec::new();
        }
        self.countdown = self.config.next_countdown();
        self.expire_silent_neighbors();
        self.table_broadcast()
    }

    fn expire_silent_neighbors(&mut self) {
        let threshold = self.config.expiry_threshold();
        let silent: Vec<Ipv4Addr> = self
            .last_heard
            .iter()
            .filter(|(_, heard)| heard.elapsed() > threshold)
            .map(|(address, _)| *address)
            .collect();

        for neighbor in silent {
            let invalidated = self.table.invalidate_via(neighbor);
            if invalidated > 0 {
                warn!("Router {}: neighbor {} silent for over {:?}, {} route(s) now unreachable",
                      self.address, neighbor, threshold, invalidated);
            }
        }
    }

    async fn request_whole_table(&self) {
        let neighbors: Vec<Ipv4Addr> = self.neighbors.keys().copied().collect();
        for neighbor in neighbors {
            self.send(Packet::rip(RipMessage::whole_table_request(), neighbor)).await;
        }
    }

    async fn send_whole_table(&self, target: Ipv4Addr) {
        let messages = RipMessage::responses(self.table.advertisements());
        debug!("Router {} sending {} table chunk(s) to {}", self.address, messages.len(), target);
        for message in messages {
            self.send(Packet::rip(message, target).with_hop_budget(1)).await;
        }
    }

    fn table_broadcast(&self) -> Outbound {
        let messages = RipMessage::responses(self.table.advertisements());
        debug!("Router {} broadcasting {} table chunk(s)", self.address, messages.len());
        let mut outbound = Vec::with_capacity(messages.len() * self.neighbors.len());
        for message in messages {
            let mut packet = Packet::rip(message, BROADCAST).with_hop_budget(1);
            packet.sender = self.address;
            for mailbox in self.neighbors.values() {
                outbound.push((mailbox.clone(), packet.clone()));
            }
        }
        outbound
    }

    async fn send(&self, mut packet: Packet) -> bool {
        packet.sender = self.address;
        if packet.is_broadcast() {
            self.flood(packet, None).await;
            true
        } else {
            self.forward(&packet).await
        }
    }

    async fn forward(&self, packet: &Packet) -> bool {
        let mailbox = self
            .table
            .find_next_hop(packet.destination)
            .and_then(|next_hop| self.neighbors.get(&next_hop));
        match mailbox {
            Some(mailbox) => {
                deliver(mailbox, packet.clone()).await;
                true
            }
            None => {
                debug!("Router {} has no route to {}, dropping packet", self.address, packet.destination);
                false
            }
        }
    }

    async fn flood(&self, mut packet: Packet, except: Option<Ipv4Addr>) {
        packet.sender = self.address;
        for (address, mailbox) in &self.neighbors {
            if Some(*address) != except {
                deliver(mailbox, packet.clone()).await;
            }
        }
    }

    fn status(&self) -> RouterStatus {
        let mut neighbors: Vec<Ipv4Addr> = self.neighbors.keys().copied().collect();
        neighbors.sort();
        RouterStatus {
            name: self.name.clone(),
            address: self.address,
            mask: self.mask,
            accepting: self.accepting,
            running: self.running,
            neighbors,
            table: self.table.entries().to_vec(),
        }
    }
}

async fn deliver(mailbox: &mpsc::Sender<Packet>, packet: Packet) {
    if mailbox.send(packet).await.is_err() {
        debug!("Neighbor mailbox closed, packet lost");
    }
}

fn spawn_update_duty(control: mpsc::UnboundedSender<RouterControl>, tick: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (reply, outbound) = oneshot::channel();
            if control.send(RouterControl::Tick(reply)).is_err() {
                break;
            }
            let Ok(outbound) = outbound.await else {
                break;
            };
            for (mailbox, packet) in outbound {
                deliver(&mailbox, packet).await;
            }
        }
    });
}
