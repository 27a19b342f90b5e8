//! Paged memory dispatch.
//!
//! The coprocessors access memory through a page map to support control
//! registers, unmapped regions, and mirrored regions. The map consists of
//! two arrays of 256 entries, one for reads and one for writes — one entry
//! per 256-byte page. Each entry is either a direct reference into the
//! map's backing arena (the fast path: one bounds-free index after a single
//! discriminant branch) or an adapter index selecting a boxed handler (the
//! slow path, used for devices, banked ROM, and open-bus regions).
//!
//! Unmapped pages are never an error: every page starts out pointing at the
//! open-bus adapter, which returns a fixed fill pattern on read and
//! discards writes, reproducing the floating bus of the real machine.
//!
//! The map also carries the trace-page table used by the trace cache: each
//! page is untraceable (0), traceable but unassigned (1), or backed by a
//! trace segment (>= 2). Any write dispatched through the write path that
//! lands on a segment-backed page latches a synchronous invalidation
//! request which the owning CPU consumes at the next instruction boundary.

/// Read-side page handler. `read` may have side effects (device registers);
/// `debug_read` must not, so debuggers can inspect memory safely.
pub trait ReadAdapter {
    fn read(&mut self, addr: u16) -> u8;
    fn debug_read(&self, addr: u16) -> u8;
}

/// Write-side page handler.
pub trait WriteAdapter {
    fn write(&mut self, addr: u16, value: u8);
}

/// Open-bus read: every address floats to the same fill value.
struct OpenBus {
    fill: u8,
}

impl ReadAdapter for OpenBus {
    fn read(&mut self, _addr: u16) -> u8 {
        self.fill
    }

    fn debug_read(&self, _addr: u16) -> u8 {
        self.fill
    }
}

/// Open-bus write: stores vanish.
struct DiscardWrite;

impl WriteAdapter for DiscardWrite {
    fn write(&mut self, _addr: u16, _value: u8) {}
}

/// A read map entry: direct arena page or adapter index.
#[derive(Debug, Clone, Copy)]
enum ReadPage {
    /// Arena offset of the page's first byte.
    Direct(u32),
    /// Index into the read adapter table.
    Adapter(u16),
}

/// A write map entry: direct arena page or adapter index.
#[derive(Debug, Clone, Copy)]
enum WritePage {
    Direct(u32),
    Adapter(u16),
}

/// Trace-page state: page cannot hold compiled traces.
pub const TRACE_PAGE_OFF: u32 = 0;
/// Trace-page state: page may hold traces but has no segment yet.
pub const TRACE_PAGE_READY: u32 = 1;

/// The paged memory map for one coprocessor instance.
///
/// Installed and mutated only by the owning system between run calls.
pub struct MemoryMap {
    read_map: [ReadPage; 256],
    write_map: [WritePage; 256],
    trace_map: [u32; 256],
    arena: Vec<u8>,
    read_adapters: Vec<Box<dyn ReadAdapter>>,
    write_adapters: Vec<Box<dyn WriteAdapter>>,
    invalidate_latch: bool,
}

impl MemoryMap {
    /// Create a map with every page open-bus, reading back `fill`.
    #[must_use]
    pub fn new(fill: u8) -> Self {
        Self {
            read_map: [ReadPage::Adapter(0); 256],
            write_map: [WritePage::Adapter(0); 256],
            trace_map: [TRACE_PAGE_OFF; 256],
            arena: Vec::new(),
            read_adapters: vec![Box::new(OpenBus { fill })],
            write_adapters: vec![Box::new(DiscardWrite)],
            invalidate_latch: false,
        }
    }

    /// Map `n` pages of fresh RAM (zero-filled) at `base_page`.
    pub fn map_ram(&mut self, base_page: u8, n: u16) {
        let start = self.alloc_pages(n);
        for i in 0..n {
            let page = usize::from(base_page) + usize::from(i);
            self.read_map[page] = ReadPage::Direct(start + u32::from(i) * 256);
            self.write_map[page] = WritePage::Direct(start + u32::from(i) * 256);
            self.reset_page_tracing(page);
        }
    }

    /// Map `n` pages of ROM at `base_page` from `data` (`n * 256` bytes).
    /// Reads are direct; writes are discarded.
    pub fn map_rom(&mut self, base_page: u8, n: u16, data: &[u8]) {
        assert_eq!(data.len(), usize::from(n) * 256, "ROM image size mismatch");

        let start = self.alloc_pages(n);
        self.arena[start as usize..start as usize + data.len()].copy_from_slice(data);

        for i in 0..n {
            let page = usize::from(base_page) + usize::from(i);
            self.read_map[page] = ReadPage::Direct(start + u32::from(i) * 256);
            self.write_map[page] = WritePage::Adapter(0);
            self.reset_page_tracing(page);
        }
    }

    /// Map one 256-byte arena page repeated across `n` logical pages
    /// (all aliases of the same storage).
    pub fn repeat_page(&mut self, base_page: u8, n: u16) {
        let start = self.alloc_pages(1);
        for i in 0..n {
            let page = usize::from(base_page) + usize::from(i);
            self.read_map[page] = ReadPage::Direct(start);
            self.write_map[page] = WritePage::Direct(start);
            self.reset_page_tracing(page);
        }
    }

    /// Install a read handler over `n` pages starting at `base_page`.
    pub fn set_read_handler(&mut self, base_page: u8, n: u16, adapter: Box<dyn ReadAdapter>) {
        let index = self.read_adapters.len() as u16;
        self.read_adapters.push(adapter);
        for i in 0..n {
            let page = usize::from(base_page) + usize::from(i);
            self.read_map[page] = ReadPage::Adapter(index);
            self.reset_page_tracing(page);
        }
    }

    /// Install a write handler over `n` pages starting at `base_page`.
    pub fn set_write_handler(&mut self, base_page: u8, n: u16, adapter: Box<dyn WriteAdapter>) {
        let index = self.write_adapters.len() as u16;
        self.write_adapters.push(adapter);
        for i in 0..n {
            let page = usize::from(base_page) + usize::from(i);
            self.write_map[page] = WritePage::Adapter(index);
            self.reset_page_tracing(page);
        }
    }

    /// Install read and write handlers over the same page range.
    pub fn set_handlers(
        &mut self,
        base_page: u8,
        n: u16,
        read: Box<dyn ReadAdapter>,
        write: Box<dyn WriteAdapter>,
    ) {
        self.set_read_handler(base_page, n, read);
        self.set_write_handler(base_page, n, write);
    }

    /// Copy the mappings from a source page range to a destination range.
    /// Direct entries alias the same storage; the copy is ascending so
    /// replication across a larger range is possible.
    pub fn mirror(&mut self, base_page: u8, n: u16, src_base_page: u8) {
        for i in 0..n {
            let dst = usize::from(base_page) + usize::from(i);
            let src = usize::from(src_base_page) + usize::from(i);
            self.read_map[dst] = self.read_map[src];
            self.write_map[dst] = self.write_map[src];
            self.trace_map[dst] = self.trace_map[src].min(TRACE_PAGE_READY);
        }
    }

    /// Read a byte, with device side effects.
    pub fn read(&mut self, addr: u16) -> u8 {
        match self.read_map[usize::from(addr >> 8)] {
            ReadPage::Direct(base) => self.arena[base as usize + usize::from(addr & 0xFF)],
            ReadPage::Adapter(index) => self.read_adapters[usize::from(index)].read(addr),
        }
    }

    /// Read a byte without side effects.
    #[must_use]
    pub fn debug_read(&self, addr: u16) -> u8 {
        match self.read_map[usize::from(addr >> 8)] {
            ReadPage::Direct(base) => self.arena[base as usize + usize::from(addr & 0xFF)],
            ReadPage::Adapter(index) => self.read_adapters[usize::from(index)].debug_read(addr),
        }
    }

    /// Write a byte. Writes landing on a page backed by a compiled trace
    /// latch a synchronous invalidation request as part of the write.
    pub fn write(&mut self, addr: u16, value: u8) {
        let page = usize::from(addr >> 8);

        match self.write_map[page] {
            WritePage::Direct(base) => {
                self.arena[base as usize + usize::from(addr & 0xFF)] = value;
            }
            WritePage::Adapter(index) => {
                self.write_adapters[usize::from(index)].write(addr, value);
            }
        }

        if self.trace_map[page] > TRACE_PAGE_READY {
            self.invalidate_latch = true;
        }
    }

    /// Read a range without side effects (debugger view).
    pub fn debug_read_range(&self, addr: u16, dst: &mut [u8]) {
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = self.debug_read(addr.wrapping_add(i as u16));
        }
    }

    /// Write a range through the write path (device effects and trace
    /// invalidation included).
    pub fn write_range(&mut self, addr: u16, src: &[u8]) {
        for (i, &byte) in src.iter().enumerate() {
            self.write(addr.wrapping_add(i as u16), byte);
        }
    }

    /// Mark `n` pages starting at `base_page` as eligible for trace
    /// compilation. Only direct-read pages should be marked; handler pages
    /// have side-effecting fetches and must stay untraceable.
    pub fn set_traceable(&mut self, base_page: u8, n: u16) {
        for i in 0..n {
            let page = usize::from(base_page) + usize::from(i);
            if self.trace_map[page] == TRACE_PAGE_OFF {
                self.trace_map[page] = TRACE_PAGE_READY;
            }
        }
    }

    /// Trace-page state for one page.
    #[must_use]
    pub fn trace_page(&self, page: u8) -> u32 {
        self.trace_map[usize::from(page)]
    }

    /// Assign a trace segment id (or readiness state) to one page.
    pub fn set_trace_page(&mut self, page: u8, state: u32) {
        self.trace_map[usize::from(page)] = state;
    }

    /// Drop all segment assignments, keeping pages traceable. Used when the
    /// trace cache is flushed wholesale.
    pub fn reset_trace_pages(&mut self) {
        for state in &mut self.trace_map {
            if *state > TRACE_PAGE_READY {
                *state = TRACE_PAGE_READY;
            }
        }
    }

    /// Consume the synchronous invalidation latch.
    pub fn take_invalidation_latch(&mut self) -> bool {
        std::mem::replace(&mut self.invalidate_latch, false)
    }

    /// Remapping a page invalidates anything compiled from it.
    fn reset_page_tracing(&mut self, page: usize) {
        if self.trace_map[page] > TRACE_PAGE_READY {
            self.invalidate_latch = true;
        }
        self.trace_map[page] = TRACE_PAGE_OFF;
    }

    fn alloc_pages(&mut self, n: u16) -> u32 {
        let start = self.arena.len() as u32;
        self.arena.resize(self.arena.len() + usize::from(n) * 256, 0);
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_reads_float_to_fill() {
        let mut map = MemoryMap::new(0xFF);
        assert_eq!(map.read(0x0000), 0xFF);
        assert_eq!(map.read(0xFFFF), 0xFF);
        assert_eq!(map.debug_read(0x8000), 0xFF);

        // Writes to unmapped space vanish without error.
        map.write(0x8000, 0x55);
        assert_eq!(map.read(0x8000), 0xFF);
    }

    #[test]
    fn ram_round_trips() {
        let mut map = MemoryMap::new(0xFF);
        map.map_ram(0x00, 16);

        map.write(0x0123, 0xA5);
        assert_eq!(map.read(0x0123), 0xA5);
        assert_eq!(map.debug_read(0x0123), 0xA5);

        // Past the mapped range it's still open bus.
        assert_eq!(map.read(0x1000), 0xFF);
    }

    #[test]
    fn rom_ignores_writes() {
        let mut map = MemoryMap::new(0xFF);
        let image: Vec<u8> = (0..512).map(|i| i as u8).collect();
        map.map_rom(0xFE, 2, &image);

        assert_eq!(map.read(0xFE00), 0x00);
        assert_eq!(map.read(0xFE01), 0x01);
        map.write(0xFE00, 0x99);
        assert_eq!(map.read(0xFE00), 0x00);
    }

    #[test]
    fn mirrored_pages_alias() {
        let mut map = MemoryMap::new(0xFF);
        map.map_ram(0x00, 4);
        map.mirror(0x40, 4, 0x00);

        map.write(0x0005, 0x12);
        assert_eq!(map.read(0x4005), 0x12);

        map.write(0x4106, 0x34);
        assert_eq!(map.read(0x0106), 0x34);
    }

    #[test]
    fn repeat_page_aliases_one_page() {
        let mut map = MemoryMap::new(0xFF);
        map.repeat_page(0x20, 4);

        map.write(0x2011, 0x77);
        assert_eq!(map.read(0x2111), 0x77);
        assert_eq!(map.read(0x2311), 0x77);
    }

    struct CountingPort {
        reads: u32,
        last_write: (u16, u8),
    }

    impl ReadAdapter for std::rc::Rc<std::cell::RefCell<CountingPort>> {
        fn read(&mut self, addr: u16) -> u8 {
            self.borrow_mut().reads += 1;
            (addr & 0xFF) as u8
        }

        fn debug_read(&self, addr: u16) -> u8 {
            // No side effects.
            (addr & 0xFF) as u8
        }
    }

    impl WriteAdapter for std::rc::Rc<std::cell::RefCell<CountingPort>> {
        fn write(&mut self, addr: u16, value: u8) {
            self.borrow_mut().last_write = (addr, value);
        }
    }

    #[test]
    fn handlers_route_and_debug_reads_are_silent() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let port = Rc::new(RefCell::new(CountingPort {
            reads: 0,
            last_write: (0, 0),
        }));

        let mut map = MemoryMap::new(0xFF);
        map.set_handlers(0xD0, 1, Box::new(Rc::clone(&port)), Box::new(Rc::clone(&port)));

        assert_eq!(map.read(0xD042), 0x42);
        assert_eq!(port.borrow().reads, 1);

        assert_eq!(map.debug_read(0xD042), 0x42);
        assert_eq!(port.borrow().reads, 1, "debug read must not tick the device");

        map.write(0xD017, 0xAB);
        assert_eq!(port.borrow().last_write, (0xD017, 0xAB));
    }

    #[test]
    fn write_to_trace_backed_page_latches_invalidation() {
        let mut map = MemoryMap::new(0xFF);
        map.map_ram(0x00, 8);
        map.set_traceable(0x02, 1);

        // Traceable but unassigned: no latch.
        map.write(0x0200, 0x01);
        assert!(!map.take_invalidation_latch());

        // Segment-backed: the write latches synchronously.
        map.set_trace_page(0x02, 2);
        map.write(0x0200, 0x02);
        assert!(map.take_invalidation_latch());
        assert!(!map.take_invalidation_latch(), "latch is consumed on read");

        // Writes to other pages don't latch.
        map.write(0x0300, 0x03);
        assert!(!map.take_invalidation_latch());
    }

    #[test]
    fn remap_resets_trace_state_and_latches() {
        let mut map = MemoryMap::new(0xFF);
        map.map_ram(0x00, 4);
        map.set_traceable(0x00, 4);
        map.set_trace_page(0x01, 5);

        map.map_ram(0x01, 1);
        assert!(map.take_invalidation_latch());
        assert_eq!(map.trace_page(0x01), TRACE_PAGE_OFF);
    }

    #[test]
    fn reset_trace_pages_keeps_traceability() {
        let mut map = MemoryMap::new(0xFF);
        map.map_ram(0x00, 4);
        map.set_traceable(0x00, 4);
        map.set_trace_page(0x02, 7);

        map.reset_trace_pages();
        assert_eq!(map.trace_page(0x02), TRACE_PAGE_READY);
        assert_eq!(map.trace_page(0x03), TRACE_PAGE_READY);
    }

    #[test]
    fn bulk_helpers() {
        let mut map = MemoryMap::new(0xFF);
        map.map_ram(0x00, 4);

        map.write_range(0x00FE, &[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        map.debug_read_range(0x00FE, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }
}
