//! Handled devices and their per-session buffers.
//!
//! Records live in one contiguous list in registration order. Removing a record shifts
//! every later record down by one, so an index is only meaningful until the registry is
//! modified again: look indices up at the start of a session and use them within that
//! session only. The server never mutates the list while a session runs.
use crate::device::radio::MAX_SIZE_OF_RF_PACKET;
use crate::ClientId;

/// Maximum number of simultaneously handled devices.
pub const MAX_CLIENT_NUMBER: usize = 300;
/// Capacity of the per-device outbound buffer.
pub const MAX_SIZE_OF_DATA_FOR_SENDING: usize = 4;
/// Passed to [DeviceRegistry::remove_client] to drop every device.
pub const ALL_CLIENTS: ClientId = -1;

/// Outcome of the current cycle for one device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum CommStatus {
    /// Polled (or addressed) and never answered.
    TimedOut = -1,
    #[default]
    NotContacted = 0,
    /// Answered the lookup poll.
    Responded = 1,
    /// Delivered a payload during the session.
    DataReceived = 2,
}

impl CommStatus {
    pub fn has_responded(&self) -> bool {
        matches!(self, CommStatus::Responded | CommStatus::DataReceived)
    }
}

/// One handled device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    id: ClientId,
    status: CommStatus,
    inbound: [u8; MAX_SIZE_OF_RF_PACKET],
    inbound_len: usize,
    outbound: [u8; MAX_SIZE_OF_DATA_FOR_SENDING],
    outbound_len: usize,
}

impl DeviceRecord {
    fn new(id: ClientId) -> Self {
        Self {
            id,
            status: CommStatus::NotContacted,
            inbound: [0; MAX_SIZE_OF_RF_PACKET],
            inbound_len: 0,
            outbound: [0; MAX_SIZE_OF_DATA_FOR_SENDING],
            outbound_len: 0,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn status(&self) -> CommStatus {
        self.status
    }

    /// Payload received during the current cycle (empty if none).
    pub fn received(&self) -> &[u8] {
        &self.inbound[..self.inbound_len]
    }

    /// Data queued for the next exchange.
    pub fn outbound(&self) -> &[u8] {
        &self.outbound[..self.outbound_len]
    }
}

/// Bounded list of handled devices.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    records: Vec<DeviceRecord>,
    capacity: usize,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_capacity(MAX_CLIENT_NUMBER)
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn handled_clients_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Starts handling `id`. Fails without side effect if the registry is full, the id is
    /// already handled or negative.
    pub fn add_client(&mut self, id: ClientId) -> bool {
        if id < 0 || self.is_full() || self.is_device_handled(id) {
            return false;
        }
        self.records.push(DeviceRecord::new(id));
        true
    }

    /// Adds `count` consecutive ids starting at `from`.
    ///
    /// Already handled ids are skipped; the first id that does not fit stops the whole
    /// range. Returns true only if every id of the range was added.
    pub fn add_client_by_range(&mut self, from: ClientId, count: u16) -> bool {
        let mut complete = true;
        for id in from as i32..from as i32 + count as i32 {
            if id > ClientId::MAX as i32 || self.is_full() {
                return false;
            }
            complete &= self.add_client(id as ClientId);
        }
        complete
    }

    /// Stops handling `id`, or every device if `id` is [ALL_CLIENTS].
    pub fn remove_client(&mut self, id: ClientId) -> bool {
        if id == ALL_CLIENTS {
            self.records.clear();
            return true;
        }
        match self.client_index_by_id(id) {
            Some(index) => {
                self.records.remove(index);
                true
            }
            None => false,
        }
    }

    /// Stops handling ids `from..from + count`. Returns true if anything was removed.
    pub fn remove_clients_by_range(&mut self, from: ClientId, count: u16) -> bool {
        let (from, end) = (from as i32, from as i32 + count as i32);
        let before = self.records.len();
        self.records
            .retain(|record| !(from..end).contains(&(record.id as i32)));
        self.records.len() != before
    }

    pub fn client_id_at(&self, index: usize) -> Option<ClientId> {
        self.records.get(index).map(|record| record.id)
    }

    pub fn client_index_by_id(&self, id: ClientId) -> Option<usize> {
        self.records.iter().position(|record| record.id == id)
    }

    pub fn is_device_handled(&self, id: ClientId) -> bool {
        self.client_index_by_id(id).is_some()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter()
    }

    /// Queues `data` for the device at `index`. Bytes past
    /// [MAX_SIZE_OF_DATA_FOR_SENDING] are dropped.
    pub fn put_data_for_sending(&mut self, index: usize, data: &[u8]) -> bool {
        match self.records.get_mut(index) {
            Some(record) => {
                let len = data.len().min(MAX_SIZE_OF_DATA_FOR_SENDING);
                record.outbound[..len].copy_from_slice(&data[..len]);
                record.outbound_len = len;
                true
            }
            None => false,
        }
    }

    pub fn received_data_by_index(&self, index: usize) -> Option<&[u8]> {
        self.records.get(index).map(DeviceRecord::received)
    }

    pub fn received_data_by_id(&self, id: ClientId) -> Option<&[u8]> {
        self.client_index_by_id(id)
            .and_then(|index| self.received_data_by_index(index))
    }

    pub fn received_len_by_index(&self, index: usize) -> usize {
        self.received_data_by_index(index).map_or(0, <[u8]>::len)
    }

    pub fn received_len_by_id(&self, id: ClientId) -> usize {
        self.received_data_by_id(id).map_or(0, <[u8]>::len)
    }

    pub fn status_by_index(&self, index: usize) -> Option<CommStatus> {
        self.records.get(index).map(DeviceRecord::status)
    }

    pub fn status_by_id(&self, id: ClientId) -> Option<CommStatus> {
        self.client_index_by_id(id)
            .and_then(|index| self.status_by_index(index))
    }

    /// Number of devices whose status says they answered this cycle.
    pub fn responded_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.status.has_responded())
            .count()
    }

    pub(crate) fn set_status(&mut self, index: usize, status: CommStatus) {
        if let Some(record) = self.records.get_mut(index) {
            record.status = status;
        }
    }

    pub(crate) fn reset_statuses(&mut self) {
        for record in &mut self.records {
            record.status = CommStatus::NotContacted;
        }
    }

    /// Forgets the previous cycle: statuses and received payloads.
    pub(crate) fn begin_session(&mut self) {
        for record in &mut self.records {
            record.status = CommStatus::NotContacted;
            record.inbound_len = 0;
        }
    }

    /// Copies `payload` into the inbound buffer of `index` and hands the stored bytes
    /// back for in-place decryption.
    pub(crate) fn store_received(&mut self, index: usize, payload: &[u8]) -> Option<&mut [u8]> {
        let record = self.records.get_mut(index)?;
        let len = payload.len().min(MAX_SIZE_OF_RF_PACKET);
        record.inbound[..len].copy_from_slice(&payload[..len]);
        record.inbound_len = len;
        Some(&mut record.inbound[..len])
    }
}
