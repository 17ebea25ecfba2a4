//! Slot and connection bookkeeping for one session
//!
//! This module tracks who sits where in a session:
//! - Participant slots `0..capacity`, fixed for the life of the session
//! - Spectator slots appended after the participant range on demand
//! - Live connections, their outbound queues and liveness timestamps
//! - The mapping from connection to slot used to resolve inbound messages
//!
//! A slot is either vacant, bound to a live connection, or reserved for a
//! participant whose connection dropped and who may still rejoin. The
//! registry never decides *when* a reserved slot is released; the session
//! does that from its grace timers.

use crate::security::RateLimiter;
use crate::validator::Actor;
use log::info;
use shared::{ReasonCode, Role, ServerMessage, SlotInfo, SlotStatus};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// Connection identifier assigned by the network layer.
pub type ConnId = u64;

/// Queue feeding a connection's writer task. Dropping every sender closes
/// the connection once the queue is drained.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Highest index a slot can take.
const MAX_SLOTS: usize = u8::MAX as usize + 1;

/// A live connection attached to the session
///
/// Connections exist before they are bound to a slot: the first message
/// (HELLO or REJOIN) is processed after the connection is attached, and a
/// refused join leaves it unbound until it is dropped.
#[derive(Debug)]
pub struct Connection {
    /// Identifier from the network layer
    pub id: ConnId,
    /// Peer address, used for logging and bans
    pub addr: SocketAddr,
    /// Last time anything was received from this connection
    pub last_seen: Instant,
    /// Slot this connection is bound to, if any
    pub slot: Option<u8>,
    sender: Outbound,
    limiter: RateLimiter,
}

impl Connection {
    pub fn new(id: ConnId, addr: SocketAddr, sender: Outbound, actions_per_second: u32, now: Instant) -> Self {
        Self {
            id,
            addr,
            last_seen: now,
            slot: None,
            sender,
            limiter: RateLimiter::per_second(actions_per_second),
        }
    }

    /// Queues a message. Returns false if the writer task has already gone
    /// away, which the caller treats as a dropped connection.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_seen) > timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    Vacant,
    Connected(ConnId),
    /// Connection lost; held for a possible rejoin.
    Reserved,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub index: u8,
    pub role: Role,
    pub name: String,
    pub occupant: Occupant,
    pub ready: bool,
}

impl Slot {
    fn vacant(index: u8, role: Role) -> Self {
        Self {
            index,
            role,
            name: String::new(),
            occupant: Occupant::Vacant,
            ready: false,
        }
    }

    pub fn is_vacant(&self) -> bool {
        self.occupant == Occupant::Vacant
    }

    fn info(&self) -> SlotInfo {
        SlotInfo {
            index: self.index,
            name: self.name.clone(),
            role: self.role,
            status: match self.occupant {
                Occupant::Vacant => SlotStatus::Vacant,
                Occupant::Connected(_) => SlotStatus::Connected,
                Occupant::Reserved => SlotStatus::Reserved,
            },
            ready: self.ready,
        }
    }
}

/// What `release` did with the slot of a dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The connection never joined a slot.
    Unbound,
    /// A participant slot is now reserved for a rejoin.
    Reserved(u8),
    /// A spectator slot was freed immediately.
    Vacated(u8),
}

/// Owns every slot and connection of a session
///
/// The registry enforces seat capacity and resolves inbound connections to
/// actors. All methods are synchronous; the session drives it from its
/// single event loop so no locking is needed.
pub struct ConnectionRegistry {
    capacity: u8,
    max_spectators: Option<u8>,
    actions_per_second: u32,
    slots: Vec<Slot>,
    connections: HashMap<ConnId, Connection>,
}

impl ConnectionRegistry {
    /// Creates a registry with `capacity` vacant participant slots
    pub fn new(capacity: u8, max_spectators: Option<u8>, actions_per_second: u32) -> Self {
        let slots = (0..capacity)
            .map(|index| Slot::vacant(index, Role::Participant))
            .collect();
        Self {
            capacity,
            max_spectators,
            actions_per_second,
            slots,
            connections: HashMap::new(),
        }
    }

    /// Registers a new, not yet joined connection
    pub fn attach(&mut self, id: ConnId, addr: SocketAddr, sender: Outbound, now: Instant) {
        let connection = Connection::new(id, addr, sender, self.actions_per_second, now);
        info!("Connection {} attached from {}", id, addr);
        self.connections.insert(id, connection);
    }

    /// Seats a connection in a slot
    ///
    /// Participants take `desired_slot` when given, otherwise the lowest
    /// vacant participant slot. Spectators reuse a vacant spectator slot or
    /// append a new one, subject to the spectator cap.
    pub fn join(
        &mut self,
        id: ConnId,
        name: &str,
        role: Role,
        desired_slot: Option<u8>,
    ) -> Result<u8, ReasonCode> {
        let bound = self
            .connections
            .get(&id)
            .ok_or(ReasonCode::Malformed)?
            .slot
            .is_some();
        if bound {
            return Err(ReasonCode::AlreadyJoined);
        }

        let index = match role {
            Role::Participant => self.pick_participant_slot(desired_slot)?,
            Role::Spectator => self.pick_spectator_slot()?,
        };

        let slot = &mut self.slots[index as usize];
        slot.name = name.to_string();
        slot.occupant = Occupant::Connected(id);
        slot.ready = false;
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.slot = Some(index);
        }
        info!("Connection {} joined slot {} as {:?} ({})", id, index, role, name);
        Ok(index)
    }

    fn pick_participant_slot(&self, desired_slot: Option<u8>) -> Result<u8, ReasonCode> {
        match desired_slot {
            Some(index) if index >= self.capacity => Err(ReasonCode::OutOfRange),
            Some(index) if !self.slots[index as usize].is_vacant() => Err(ReasonCode::SlotTaken),
            Some(index) => Ok(index),
            None => self.slots[..self.capacity as usize]
                .iter()
                .find(|slot| slot.is_vacant())
                .map(|slot| slot.index)
                .ok_or(ReasonCode::SessionFull),
        }
    }

    fn pick_spectator_slot(&mut self) -> Result<u8, ReasonCode> {
        if let Some(max) = self.max_spectators {
            if self.spectator_count() >= max as usize {
                return Err(ReasonCode::SpectatorsFull);
            }
        }
        if let Some(slot) = self.slots[self.capacity as usize..]
            .iter()
            .find(|slot| slot.is_vacant())
        {
            return Ok(slot.index);
        }
        if self.slots.len() >= MAX_SLOTS {
            return Err(ReasonCode::SpectatorsFull);
        }
        let index = self.slots.len() as u8;
        self.slots.push(Slot::vacant(index, Role::Spectator));
        Ok(index)
    }

    /// Binds a connection to an existing slot after a successful rejoin
    ///
    /// Returns the connection previously bound to the slot, if it was
    /// still live; the caller is expected to close it.
    pub fn rebind(&mut self, slot: u8, id: ConnId) -> Option<ConnId> {
        let previous = match self.slots.get(slot as usize)?.occupant {
            Occupant::Connected(old) if old != id => Some(old),
            _ => None,
        };
        if let Some(old) = previous {
            if let Some(connection) = self.connections.get_mut(&old) {
                connection.slot = None;
            }
        }
        self.slots[slot as usize].occupant = Occupant::Connected(id);
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.slot = Some(slot);
        }
        info!("Connection {} rebound to slot {}", id, slot);
        previous
    }

    /// Removes a connection and updates its slot
    ///
    /// Participant slots become reserved, spectator slots are vacated.
    pub fn release(&mut self, id: ConnId) -> Released {
        let Some(connection) = self.connections.remove(&id) else {
            return Released::Unbound;
        };
        info!("Connection {} from {} closed", id, connection.addr);
        let Some(index) = connection.slot else {
            return Released::Unbound;
        };
        let slot = &mut self.slots[index as usize];
        if slot.occupant != Occupant::Connected(id) {
            return Released::Unbound;
        }
        match slot.role {
            Role::Participant => {
                slot.occupant = Occupant::Reserved;
                Released::Reserved(index)
            }
            Role::Spectator => {
                *slot = Slot::vacant(index, Role::Spectator);
                Released::Vacated(index)
            }
        }
    }

    /// Frees a slot outright and detaches any connection bound to it
    pub fn vacate(&mut self, index: u8) -> Option<ConnId> {
        let slot = self.slots.get_mut(index as usize)?;
        let bound = match slot.occupant {
            Occupant::Connected(id) => Some(id),
            _ => None,
        };
        *slot = Slot::vacant(index, slot.role);
        if let Some(id) = bound {
            if let Some(connection) = self.connections.get_mut(&id) {
                connection.slot = None;
            }
        }
        bound
    }

    /// Drops a connection without touching its slot
    pub fn detach(&mut self, id: ConnId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn touch(&mut self, id: ConnId, now: Instant) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.last_seen = now;
        }
    }

    /// Spends one unit of the connection's action budget
    pub fn allow_action(&mut self, id: ConnId, now: Instant) -> bool {
        self.connections
            .get_mut(&id)
            .map_or(false, |connection| connection.limiter.allow(now))
    }

    /// Connections that have been silent for longer than `timeout`
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self
            .connections
            .values()
            .filter(|connection| connection.is_timed_out(now, timeout))
            .map(|connection| connection.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn actor(&self, id: ConnId) -> Option<Actor> {
        let index = self.connections.get(&id)?.slot?;
        let slot = self.slots.get(index as usize)?;
        Some(Actor {
            slot: index,
            role: slot.role,
        })
    }

    pub fn slot(&self, index: u8) -> Option<&Slot> {
        self.slots.get(index as usize)
    }

    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn set_ready(&mut self, index: u8, ready: bool) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.ready = ready;
        }
    }

    pub fn is_connected(&self, index: u8) -> bool {
        matches!(
            self.slots.get(index as usize).map(|slot| slot.occupant),
            Some(Occupant::Connected(_))
        )
    }

    /// Participant slots bound to a live connection, by index
    pub fn connected_participants(&self) -> Vec<u8> {
        self.participant_slots()
            .filter(|slot| matches!(slot.occupant, Occupant::Connected(_)))
            .map(|slot| slot.index)
            .collect()
    }

    /// Participant slots that are connected or reserved, by index
    pub fn occupied_participants(&self) -> Vec<u8> {
        self.participant_slots()
            .filter(|slot| !slot.is_vacant())
            .map(|slot| slot.index)
            .collect()
    }

    /// True when every occupied participant is ready and at least
    /// `min_players` participants are seated
    pub fn all_ready(&self, min_players: u8) -> bool {
        let occupied: Vec<&Slot> = self.participant_slots().filter(|s| !s.is_vacant()).collect();
        occupied.len() >= min_players as usize && occupied.iter().all(|slot| slot.ready)
    }

    fn participant_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots[..self.capacity as usize].iter()
    }

    pub fn spectator_count(&self) -> usize {
        self.slots[self.capacity as usize..]
            .iter()
            .filter(|slot| !slot.is_vacant())
            .count()
    }

    pub fn capacity(&self) -> u8 {
        self.capacity
    }

    pub fn slot_infos(&self) -> Vec<SlotInfo> {
        self.slots.iter().map(Slot::info).collect()
    }

    /// Queues a message for one connection
    pub fn send_to(&self, id: ConnId, message: ServerMessage) -> bool {
        self.connections
            .get(&id)
            .map_or(false, |connection| connection.send(message))
    }

    /// Queues a message for every connection bound to a slot
    ///
    /// Returns the connections whose writer has gone away.
    pub fn broadcast(&self, message: &ServerMessage) -> Vec<ConnId> {
        self.connections
            .values()
            .filter(|connection| connection.slot.is_some())
            .filter(|connection| !connection.send(message.clone()))
            .map(|connection| connection.id)
            .collect()
    }

    /// Connection ids of every attached connection
    pub fn connection_ids(&self) -> Vec<ConnId> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
