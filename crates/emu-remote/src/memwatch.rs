//! Named memory watches.
//!
//! A watch names a guest address, an optional chain of pointer offsets and
//! a width. Resolving it reads guest memory on the simulation thread and
//! stores the result as a fixed-width upper-case hex string. Request
//! threads only ever read the stored snapshot.
//!
//! Pointer chase: starting at the base address, each offset dereferences
//! the 32-bit big-endian pointer at the current address and adds the
//! offset. Every address along the way must be valid RAM; the first one
//! that is not aborts the chase and the watch resolves to `"0"`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use emu_core::GuestMemory;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Value a watch resolves to when any address along its chain is invalid.
pub const FAULT_SENTINEL: &str = "0";

/// Largest width a single watch may read.
pub const MAX_WATCH_SIZE: u32 = 4096;

/// Errors in a watch definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("invalid hex value '{0}'")]
    InvalidHex(String),

    #[error("offset '{0}' does not fit in 32 bits")]
    OffsetRange(String),

    #[error("size must be between 1 and {MAX_WATCH_SIZE}, got {0}")]
    InvalidSize(u32),
}

/// Parse an unsigned hex address, with or without a `0x` prefix.
pub fn parse_hex(text: &str) -> Result<u32, WatchError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(WatchError::InvalidHex(text.to_string()));
    }
    u32::from_str_radix(digits, 16).map_err(|_| WatchError::InvalidHex(text.to_string()))
}

/// Parse a hex offset. A leading `-` makes it negative; the result is the
/// two's-complement value to add with wrapping arithmetic.
pub fn parse_offset(text: &str) -> Result<u32, WatchError> {
    let trimmed = text.trim();
    match trimmed.strip_prefix('-') {
        Some(rest) => {
            let magnitude = parse_hex(rest)?;
            if magnitude > 0x8000_0000 {
                return Err(WatchError::OffsetRange(text.to_string()));
            }
            Ok(magnitude.wrapping_neg())
        }
        None => parse_hex(trimmed),
    }
}

/// Parse whitespace-separated hex offsets into a chain.
pub fn parse_offset_chain(text: &str) -> Result<Vec<u32>, WatchError> {
    text.split_whitespace().map(parse_offset).collect()
}

/// Offset field as written on the wire: one string (possibly holding a
/// whitespace-separated chain) or an explicit list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OffsetSpec {
    Text(String),
    Chain(Vec<String>),
}

/// Watch definition as written on the wire and in `MEMWATCHES`.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSpec {
    pub address: String,
    #[serde(default)]
    pub offset: Option<OffsetSpec>,
    pub size: u32,
}

/// A parsed, validated watch definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDescriptor {
    pub address: u32,
    /// Empty for a direct read.
    pub offsets: Vec<u32>,
    /// Bytes to read at the final address.
    pub size: u32,
}

impl WatchDescriptor {
    /// Direct read of `size` bytes at `address`.
    pub fn direct(address: u32, size: u32) -> Result<Self, WatchError> {
        Self::chained(address, Vec::new(), size)
    }

    /// Pointer chase through `offsets`, then read `size` bytes.
    pub fn chained(address: u32, offsets: Vec<u32>, size: u32) -> Result<Self, WatchError> {
        if size == 0 || size > MAX_WATCH_SIZE {
            return Err(WatchError::InvalidSize(size));
        }
        Ok(Self {
            address,
            offsets,
            size,
        })
    }
}

impl TryFrom<&WatchSpec> for WatchDescriptor {
    type Error = WatchError;

    fn try_from(spec: &WatchSpec) -> Result<Self, Self::Error> {
        let address = parse_hex(&spec.address)?;
        let offsets = match &spec.offset {
            None => Vec::new(),
            Some(OffsetSpec::Text(text)) => parse_offset_chain(text)?,
            Some(OffsetSpec::Chain(items)) => items
                .iter()
                .map(|s| parse_offset(s))
                .collect::<Result<_, _>>()?,
        };
        Self::chained(address, offsets, spec.size)
    }
}

/// Follow the offset chain to the final address. `Err` carries the first
/// invalid address encountered.
fn chase<M: GuestMemory + ?Sized>(mem: &M, descriptor: &WatchDescriptor) -> Result<u32, u32> {
    let mut address = descriptor.address;
    for &offset in &descriptor.offsets {
        if !mem.is_valid_address(address) {
            return Err(address);
        }
        address = mem.read_u32(address).wrapping_add(offset);
        if !mem.is_valid_address(address) {
            return Err(address);
        }
    }
    Ok(address)
}

/// Read a watch, or return an invalid address found on the way.
fn read_watch<M: GuestMemory + ?Sized>(mem: &M, descriptor: &WatchDescriptor) -> Result<String, u32> {
    let address = chase(mem, descriptor)?;
    if !mem.is_valid_range(address, descriptor.size) {
        let last = address.saturating_add(descriptor.size.saturating_sub(1));
        return Err(if mem.is_valid_address(address) { last } else { address });
    }

    let mut bytes = vec![0u8; descriptor.size as usize];
    mem.read_bytes(address, &mut bytes);

    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(hex, "{b:02X}");
    }
    Ok(hex)
}

/// Resolve a watch to upper-case big-endian hex, `2 * size` characters, or
/// [`FAULT_SENTINEL`] if any address on the way is invalid.
pub fn resolve<M: GuestMemory + ?Sized>(mem: &M, descriptor: &WatchDescriptor) -> String {
    read_watch(mem, descriptor).unwrap_or_else(|bad| {
        warn!(
            base = format_args!("{:#010X}", descriptor.address),
            address = format_args!("{bad:#010X}"),
            "memory watch out of bounds"
        );
        FAULT_SENTINEL.to_string()
    })
}

#[derive(Debug, Clone)]
struct MemWatch {
    descriptor: WatchDescriptor,
    current_value: Option<String>,
}

impl MemWatch {
    /// Re-read the watch. Entering the fault state is logged once rather
    /// than on every frame it persists.
    fn refresh<M: GuestMemory + ?Sized>(&mut self, name: &str, mem: &M) -> String {
        let value = match read_watch(mem, &self.descriptor) {
            Ok(hex) => hex,
            Err(bad) => {
                if self.current_value.as_deref() == Some(FAULT_SENTINEL) {
                    debug!(name, address = format_args!("{bad:#010X}"), "memory watch still faulted");
                } else {
                    warn!(
                        name,
                        base = format_args!("{:#010X}", self.descriptor.address),
                        address = format_args!("{bad:#010X}"),
                        "memory watch out of bounds"
                    );
                }
                FAULT_SENTINEL.to_string()
            }
        };
        self.current_value = Some(value.clone());
        value
    }
}

/// Registry of named watches and their last resolved values.
pub struct WatchRegistry {
    watches: Mutex<BTreeMap<String, MemWatch>>,
}

impl WatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            watches: Mutex::new(BTreeMap::new()),
        }
    }

    /// Store or replace a watch. The value stays unresolved until the next
    /// [`resolve_one`](Self::resolve_one) or [`update_all`](Self::update_all).
    pub fn register(&self, name: impl Into<String>, descriptor: WatchDescriptor) {
        self.watches.lock().insert(
            name.into(),
            MemWatch {
                descriptor,
                current_value: None,
            },
        );
    }

    /// Resolve a single watch now. Returns the new value, or `None` if no
    /// watch has that name.
    pub fn resolve_one<M: GuestMemory + ?Sized>(&self, name: &str, mem: &M) -> Option<String> {
        let mut watches = self.watches.lock();
        let watch = watches.get_mut(name)?;
        Some(watch.refresh(name, mem))
    }

    /// Re-resolve every watch. Runs once per frame on the simulation thread.
    pub fn update_all<M: GuestMemory + ?Sized>(&self, mem: &M) {
        let mut watches = self.watches.lock();
        for (name, watch) in watches.iter_mut() {
            watch.refresh(name, mem);
        }
    }

    /// Last resolved value, or `None` if unknown or never resolved.
    #[must_use]
    pub fn fetch(&self, name: &str) -> Option<String> {
        self.watches
            .lock()
            .get(name)
            .and_then(|w| w.current_value.clone())
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.watches.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.watches.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watches.lock().is_empty()
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
