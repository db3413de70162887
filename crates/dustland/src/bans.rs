//! # Ban List
//!
//! Bans by account name and, optionally, by the address the account was
//! connected from. Expired bans are dropped by the periodic `Bans` job.
//! The list is saved in the generic info section of the world file.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use dustland_networking::MessageReader;
use dustland_persistence::SaveBuffer;
use parking_lot::Mutex;

use crate::error::{ServerError, ServerResult};

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

/// One ban.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BanEntry {
    /// Banned account name.
    pub name: String,
    /// Banned address, if the ban covers it.
    pub ip: Option<IpAddr>,
    /// Unix time the ban ends.
    pub expires_at: u64,
    /// Who issued the ban.
    pub banned_by: String,
    /// Reason shown to the player.
    pub reason: String,
}

impl BanEntry {
    fn covers_name(&self, name: &str) -> bool {
        !self.name.is_empty() && self.name.eq_ignore_ascii_case(name)
    }
}

/// Thread-safe list of active bans.
#[derive(Debug, Default)]
pub struct BanList {
    entries: Mutex<Vec<BanEntry>>,
}

impl BanList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a ban.
    pub fn add(&self, entry: BanEntry) {
        tracing::info!(name = %entry.name, ip = ?entry.ip, expires_at = entry.expires_at, "ban added");
        self.entries.lock().push(entry);
    }

    /// Removes every ban on `name`. Returns how many were removed.
    pub fn remove_name(&self, name: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| !e.covers_name(name));
        before - entries.len()
    }

    /// Removes the ban at `index` in listing order.
    pub fn remove_index(&self, index: usize) -> Option<BanEntry> {
        let mut entries = self.entries.lock();
        (index < entries.len()).then(|| entries.remove(index))
    }

    /// The active ban on `name`, if any.
    #[must_use]
    pub fn check_name(&self, name: &str, now: u64) -> Option<BanEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.expires_at > now && e.covers_name(name))
            .cloned()
    }

    /// The active ban on `ip`, if any.
    #[must_use]
    pub fn check_ip(&self, ip: IpAddr, now: u64) -> Option<BanEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.expires_at > now && e.ip == Some(ip))
            .cloned()
    }

    /// Drops bans that ended at or before `now` and returns them.
    pub fn sweep_expired(&self, now: u64) -> Vec<BanEntry> {
        let mut entries = self.entries.lock();
        let (expired, active): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *entries).into_iter().partition(|e| e.expires_at <= now);
        *entries = active;
        drop(entries);
        for entry in &expired {
            tracing::info!(name = %entry.name, ip = ?entry.ip, "ban expired");
        }
        expired
    }

    /// Copy of every ban, in listing order.
    #[must_use]
    pub fn entries(&self) -> Vec<BanEntry> {
        self.entries.lock().clone()
    }

    /// Number of bans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Appends the list to `out`.
    pub fn save(&self, out: &mut SaveBuffer) {
        let entries = self.entries.lock();
        let count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        out.write_u32(count);
        for entry in entries.iter().take(count as usize) {
            write_str(out, &entry.name);
            match entry.ip {
                None => out.write_bytes(&[0]),
                Some(IpAddr::V4(ip)) => {
                    out.write_bytes(&[4]);
                    out.write_bytes(&ip.octets());
                }
                Some(IpAddr::V6(ip)) => {
                    out.write_bytes(&[6]);
                    out.write_bytes(&ip.octets());
                }
            }
            out.write_u64(entry.expires_at);
            write_str(out, &entry.banned_by);
            write_str(out, &entry.reason);
        }
    }

    /// Replaces the list with the one saved at the start of `reader`.
    ///
    /// # Errors
    ///
    /// Fails on truncated or malformed entries. The list is left unchanged.
    pub fn load(&self, reader: &mut MessageReader<'_>) -> ServerResult<usize> {
        let count = reader.read_u32().ok_or_else(|| corrupt("missing ban count"))?;
        let mut loaded = Vec::new();
        for _ in 0..count {
            loaded.push(read_entry(reader).ok_or_else(|| corrupt("truncated ban entry"))?);
        }
        let len = loaded.len();
        *self.entries.lock() = loaded;
        Ok(len)
    }
}

fn write_str(out: &mut SaveBuffer, value: &str) {
    let bytes = value.as_bytes();
    let bytes = &bytes[..bytes.len().min(u32::MAX as usize)];
    out.write_u32(bytes.len() as u32);
    out.write_bytes(bytes);
}

fn read_entry(reader: &mut MessageReader<'_>) -> Option<BanEntry> {
    let name = reader.read_string()?;
    let ip = match reader.read_u8()? {
        0 => None,
        4 => Some(IpAddr::from(reader.read_array::<4>()?)),
        6 => Some(IpAddr::from(reader.read_array::<16>()?)),
        _ => return None,
    };
    Some(BanEntry {
        name,
        ip,
        expires_at: reader.read_u64()?,
        banned_by: reader.read_string()?,
        reason: reader.read_string()?,
    })
}

fn corrupt(reason: &str) -> ServerError {
    ServerError::CorruptSection {
        section: "generic info",
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ban(name: &str, ip: Option<IpAddr>, expires_at: u64) -> BanEntry {
        BanEntry {
            name: name.to_string(),
            ip,
            expires_at,
            banned_by: "admin".to_string(),
            reason: "spam".to_string(),
        }
    }

    #[test]
    fn test_check_ignores_case_and_expiry() {
        let bans = BanList::new();
        bans.add(ban("Marcus", None, 100));
        assert!(bans.check_name("marcus", 50).is_some());
        assert!(bans.check_name("marcus", 100).is_none());
        assert!(bans.check_name("Other", 50).is_none());
    }

    #[test]
    fn test_ip_ban() {
        let bans = BanList::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        bans.add(ban("Vree", Some(ip), 100));
        assert!(bans.check_ip(ip, 10).is_some());
        assert!(bans.check_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), 10).is_none());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let bans = BanList::new();
        bans.add(ban("a", None, 10));
        bans.add(ban("b", None, 20));
        bans.add(ban("c", None, 30));
        let expired = bans.sweep_expired(20);
        assert_eq!(expired.len(), 2);
        assert_eq!(bans.entries(), vec![ban("c", None, 30)]);
    }

    #[test]
    fn test_remove_by_name_and_index() {
        let bans = BanList::new();
        bans.add(ban("a", None, 10));
        bans.add(ban("b", None, 10));
        bans.add(ban("A", None, 10));
        assert_eq!(bans.remove_name("a"), 2);
        assert_eq!(bans.remove_index(0).map(|e| e.name), Some("b".to_string()));
        assert!(bans.remove_index(0).is_none());
        assert!(bans.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let bans = BanList::new();
        bans.add(ban("Marcus", None, 100));
        bans.add(ban("Vree", Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))), 200));
        bans.add(ban("Harold", Some("::1".parse().unwrap()), 300));
        let mut out = SaveBuffer::new();
        bans.save(&mut out);

        let bytes = out.to_vec();
        let restored = BanList::new();
        assert_eq!(restored.load(&mut MessageReader::new(&bytes)).unwrap(), 3);
        assert_eq!(restored.entries(), bans.entries());

        let truncated = &bytes[..bytes.len() - 3];
        assert!(restored.load(&mut MessageReader::new(truncated)).is_err());
        assert_eq!(restored.len(), 3);
    }
}
