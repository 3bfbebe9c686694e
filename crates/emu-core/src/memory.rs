//! Guarded guest memory access.

/// Granularity at which [`GuestMemory::is_valid_range`] probes a range.
const PAGE_SIZE: u32 = 0x1000;

/// Read-only view of guest memory.
///
/// Addresses are 32-bit guest (virtual) addresses. Reads of unmapped
/// addresses return zero; callers that care must check
/// [`is_valid_address`](GuestMemory::is_valid_address) first.
pub trait GuestMemory {
    /// Read a byte from the given address.
    fn read_u8(&self, address: u32) -> u8;

    /// Returns true if the address is backed by RAM.
    fn is_valid_address(&self, address: u32) -> bool;

    /// Fill `buf` from consecutive addresses starting at `address`.
    fn read_bytes(&self, address: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_u8(address.wrapping_add(i as u32));
        }
    }

    /// Read a big-endian 32-bit word (guest pointer width).
    fn read_u32(&self, address: u32) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(address, &mut buf);
        u32::from_be_bytes(buf)
    }

    /// Returns true if every byte in `address..address + len` is backed by RAM.
    ///
    /// Probes both ends of the range and the start of every 4 KiB page in
    /// between, so a range that spans a hole in the memory map fails. Machines
    /// with holes smaller than a page must override this.
    fn is_valid_range(&self, address: u32, len: u32) -> bool {
        if len == 0 {
            return self.is_valid_address(address);
        }
        let Some(last) = address.checked_add(len - 1) else {
            return false;
        };
        self.is_valid_address(address)
            && self.is_valid_address(last)
            && (address / PAGE_SIZE + 1..=last / PAGE_SIZE)
                .all(|page| self.is_valid_address(page * PAGE_SIZE))
    }
}
