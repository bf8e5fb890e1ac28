//! EEPROM emulation over two flash pages.
//!
//! Log-structured: every write appends a 4-byte record to the valid page,
//! reads return the newest record for an address. When the valid page is
//! full, the newest record of every address is copied to the other page
//! (page transfer), the old page is erased and only then is the new page
//! marked valid.
//!
//! # Page Layout
//!
//! ```text
//! offset 0   status (u16 LE)   ERASED 0xFFFF → RECEIVE 0xEEEE → VALID 0x0000
//! offset 2   reserved
//! offset 4   record 0: address (u16 LE), value (u16 LE)
//! offset 8   record 1
//! ...
//! ```
//!
//! Status transitions only clear bits, so each one is a single flash write.
//! A record whose value still reads 0xFFFF was torn by a reset and is ignored.
//!
//! The address window is larger than a page: at most `max_entries()`
//! distinct addresses can hold a value at the same time. A write past that
//! fails with [`StoreError::Full`].

use crate::config::{check_range, ConfigStore, FullPolicy, InitOutcome, StoreError, EMPTY_VALUE};
use crate::hal::FlashInterface;

const HEADER_SIZE: u32 = 4;
const RECORD_SIZE: u32 = 4;
const ERASED_WORD: u16 = 0xFFFF;

/// Page header status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PageStatus {
    Erased = 0xFFFF,
    Receive = 0xEEEE,
    Valid = 0x0000,
}

impl PageStatus {
    /// Decode a raw header word. Anything else is corrupt.
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0xFFFF => Some(PageStatus::Erased),
            0xEEEE => Some(PageStatus::Receive),
            0x0000 => Some(PageStatus::Valid),
            _ => None,
        }
    }
}

/// Where the two pages live and how large the address window is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EepromLayout {
    /// Flash address of page 0. Page 1 follows immediately.
    pub base: u32,
    /// Flash page size in bytes.
    pub page_size: u32,
    /// Size of the virtual address window in bytes.
    pub capacity: u16,
}

impl EepromLayout {
    /// STM32F103 (128 KB flash): the last two 1 KB pages, 2 KB window.
    pub const STM32F1: EepromLayout = EepromLayout {
        base: 0x0800_0000 + 128 * 1024 - 2 * 1024,
        page_size: 1024,
        capacity: 2048,
    };

    /// Flash address of page `index` (0 or 1).
    pub const fn page(&self, index: usize) -> u32 {
        self.base + index as u32 * self.page_size
    }

    /// Records that fit in one page.
    pub const fn max_entries(&self) -> u16 {
        ((self.page_size - HEADER_SIZE) / RECORD_SIZE) as u16
    }

    const fn record(&self, page: usize, slot: u16) -> u32 {
        self.page(page) + HEADER_SIZE + slot as u32 * RECORD_SIZE
    }
}

#[derive(Debug, Clone, Copy)]
struct ActivePage {
    index: usize,
    used: u16,
}

/// Byte-addressable store emulated on two flash pages.
#[derive(Debug)]
pub struct EepromEmulation<F> {
    flash: F,
    layout: EepromLayout,
    policy: FullPolicy,
    active: Option<ActivePage>,
}

impl<F: FlashInterface> EepromEmulation<F> {
    /// Create a store on `flash`. Nothing is touched until [`init`](ConfigStore::init).
    pub fn new(flash: F, layout: EepromLayout) -> Self {
        Self {
            flash,
            layout,
            policy: FullPolicy::default(),
            active: None,
        }
    }

    /// Set what `init` does with a full store.
    pub fn with_policy(mut self, policy: FullPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn layout(&self) -> &EepromLayout {
        &self.layout
    }

    /// Records used in the valid page (0 before `init`).
    pub fn used_entries(&self) -> u16 {
        self.active.map_or(0, |a| a.used)
    }

    /// Records a page can hold.
    pub fn max_entries(&self) -> u16 {
        self.layout.max_entries()
    }

    /// Index of the valid page, once initialized.
    pub fn active_page(&self) -> Option<usize> {
        self.active.map(|a| a.index)
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn read_word(&mut self, address: u32) -> Result<u16, StoreError> {
        let mut buf = [0u8; 2];
        self.flash.read(address, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn page_status(&mut self, page: usize) -> Result<Option<PageStatus>, StoreError> {
        let raw = self.read_word(self.layout.page(page))?;
        Ok(PageStatus::from_raw(raw))
    }

    fn set_status(&mut self, page: usize, status: PageStatus) -> Result<(), StoreError> {
        let word = (status as u16).to_le_bytes();
        self.flash.write(self.layout.page(page), &word)?;
        Ok(())
    }

    fn read_record(&mut self, page: usize, slot: u16) -> Result<(u16, u16), StoreError> {
        let mut buf = [0u8; RECORD_SIZE as usize];
        self.flash.read(self.layout.record(page, slot), &mut buf)?;
        Ok((
            u16::from_le_bytes([buf[0], buf[1]]),
            u16::from_le_bytes([buf[2], buf[3]]),
        ))
    }

    fn write_record(&mut self, page: usize, slot: u16, address: u16, value: u8) -> Result<(), StoreError> {
        let a = address.to_le_bytes();
        let v = u16::from(value).to_le_bytes();
        self.flash
            .write(self.layout.record(page, slot), &[a[0], a[1], v[0], v[1]])?;
        Ok(())
    }

    /// Number of slots in use, counted up to the first blank record.
    fn count_used(&mut self, page: usize) -> Result<u16, StoreError> {
        for slot in 0..self.layout.max_entries() {
            if self.read_record(page, slot)? == (ERASED_WORD, ERASED_WORD) {
                return Ok(slot);
            }
        }
        Ok(self.layout.max_entries())
    }

    /// Newest value of `address` in `page`, searching slots below `used`.
    fn lookup(&mut self, page: usize, used: u16, address: u16) -> Result<Option<u8>, StoreError> {
        for slot in (0..used).rev() {
            let (record_address, value) = self.read_record(page, slot)?;
            if record_address == address && value != ERASED_WORD {
                return Ok(Some(value as u8));
            }
        }
        Ok(None)
    }

    /// Whether the record in `slot` is the newest one for its address.
    fn is_live(&mut self, page: usize, used: u16, slot: u16) -> Result<Option<(u16, u8)>, StoreError> {
        let (address, value) = self.read_record(page, slot)?;
        if value == ERASED_WORD || address >= self.layout.capacity {
            return Ok(None);
        }
        for newer in slot + 1..used {
            let (newer_address, newer_value) = self.read_record(page, newer)?;
            if newer_address == address && newer_value != ERASED_WORD {
                return Ok(None);
            }
        }
        Ok(Some((address, value as u8)))
    }

    /// Addresses in `page` currently holding a value other than 0xFF.
    fn live_count(&mut self, page: usize, used: u16) -> Result<u16, StoreError> {
        let mut live = 0u16;
        for slot in 0..used {
            if let Some((_, value)) = self.is_live(page, used, slot)? {
                if value != EMPTY_VALUE {
                    live += 1;
                }
            }
        }
        Ok(live)
    }

    /// Check that writing `src` at `address` never needs more live
    /// addresses than a page holds, at any point of the block.
    fn check_fits(&mut self, active: ActivePage, src: &[u8], address: u16) -> Result<(), StoreError> {
        let budget = self.layout.max_entries();
        let mut live = self.live_count(active.index, active.used)?;
        for (offset, &value) in src.iter().enumerate() {
            let current = self
                .lookup(active.index, active.used, address + offset as u16)?
                .unwrap_or(EMPTY_VALUE);
            match (current == EMPTY_VALUE, value == EMPTY_VALUE) {
                (true, false) => live += 1,
                (false, true) => live -= 1,
                _ => {}
            }
            if live > budget {
                return Err(StoreError::Full);
            }
        }
        Ok(())
    }

    /// Move the newest record of every address to the other page, then
    /// append `pending`. Addresses back at 0xFF are dropped. Leaves the store
    /// untouched if the live set would not fit.
    fn transfer(&mut self, active: ActivePage, pending: (u16, u8)) -> Result<(), StoreError> {
        let (old, new) = (active.index, 1 - active.index);

        let mut live = 0u16;
        for slot in 0..active.used {
            if let Some((address, value)) = self.is_live(old, active.used, slot)? {
                if address != pending.0 && value != EMPTY_VALUE {
                    live += 1;
                }
            }
        }
        if live >= self.layout.max_entries() {
            return Err(StoreError::Full);
        }

        if self.page_status(new)? != Some(PageStatus::Erased) || self.count_used(new)? != 0 {
            self.flash.erase_page(self.layout.page(new))?;
        }
        self.set_status(new, PageStatus::Receive)?;

        let mut used = 0u16;
        for slot in 0..active.used {
            if let Some((address, value)) = self.is_live(old, active.used, slot)? {
                if address != pending.0 && value != EMPTY_VALUE {
                    self.write_record(new, used, address, value)?;
                    used += 1;
                }
            }
        }
        self.write_record(new, used, pending.0, pending.1)?;
        used += 1;

        // Old page goes first: a reset in between leaves RECEIVE + ERASED,
        // which `recover` promotes. Until then only `init` may touch the store.
        self.active = None;
        self.flash.erase_page(self.layout.page(old))?;
        self.set_status(new, PageStatus::Valid)?;

        self.active = Some(ActivePage { index: new, used });
        Ok(())
    }

    /// Settle interrupted transfers. Returns the valid page, or `None` if the
    /// pages have to be formatted.
    fn recover(&mut self) -> Result<Option<usize>, StoreError> {
        use PageStatus::*;

        let statuses = (self.page_status(0)?, self.page_status(1)?);
        let valid = match statuses {
            (Some(Valid), Some(Erased)) => 0,
            (Some(Erased), Some(Valid)) => 1,
            // Transfer started but the new page was never completed.
            (Some(Valid), Some(Receive)) => {
                self.flash.erase_page(self.layout.page(1))?;
                0
            }
            (Some(Receive), Some(Valid)) => {
                self.flash.erase_page(self.layout.page(0))?;
                1
            }
            // Transfer completed, old page erased, new page not yet marked.
            (Some(Receive), Some(Erased)) => {
                self.set_status(0, Valid)?;
                0
            }
            (Some(Erased), Some(Receive)) => {
                self.set_status(1, Valid)?;
                1
            }
            _ => return Ok(None),
        };
        Ok(Some(valid))
    }
}

impl<F: FlashInterface> ConfigStore for EepromEmulation<F> {
    fn init(&mut self) -> Result<InitOutcome, StoreError> {
        self.active = None;

        let Some(index) = self.recover()? else {
            self.format()?;
            return Ok(InitOutcome::Formatted);
        };

        let used = self.count_used(index)?;
        self.active = Some(ActivePage { index, used });

        if used >= self.layout.max_entries() {
            return match self.policy {
                FullPolicy::Reformat => {
                    self.format()?;
                    Ok(InitOutcome::Reformatted)
                }
                FullPolicy::Refuse => Err(StoreError::Full),
            };
        }

        Ok(InitOutcome::Ready)
    }

    /// Size of the address window. Only `max_entries()` of these addresses
    /// can hold a value other than 0xFF at the same time.
    fn capacity(&self) -> u16 {
        self.layout.capacity
    }

    fn read_byte(&mut self, address: u16) -> Result<u8, StoreError> {
        check_range(self.layout.capacity, address, 1)?;
        let active = self.active.ok_or(StoreError::NotInitialized)?;
        Ok(self
            .lookup(active.index, active.used, address)?
            .unwrap_or(EMPTY_VALUE))
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<(), StoreError> {
        check_range(self.layout.capacity, address, 1)?;
        let active = self.active.ok_or(StoreError::NotInitialized)?;

        let current = self.lookup(active.index, active.used, address)?;
        if current.unwrap_or(EMPTY_VALUE) == value {
            return Ok(());
        }

        if active.used < self.layout.max_entries() {
            let written = self.write_record(active.index, active.used, address, value);
            // A failed program may still have cleared bits: the slot is spent.
            self.active = Some(ActivePage {
                used: active.used + 1,
                ..active
            });
            return written;
        }

        self.transfer(active, (address, value))
    }

    /// All or nothing with respect to [`StoreError::Full`]: a block whose
    /// live addresses would not fit is rejected before anything is written.
    fn write_block(&mut self, src: &[u8], address: u16) -> Result<(), StoreError> {
        check_range(self.layout.capacity, address, src.len())?;
        let active = self.active.ok_or(StoreError::NotInitialized)?;
        self.check_fits(active, src, address)?;
        for (offset, byte) in src.iter().enumerate() {
            self.write_byte(address + offset as u16, *byte)?;
        }
        Ok(())
    }

    fn format(&mut self) -> Result<(), StoreError> {
        self.active = None;
        self.flash.erase_page(self.layout.page(0))?;
        self.flash.erase_page(self.layout.page(1))?;
        self.set_status(0, PageStatus::Valid)?;
        self.active = Some(ActivePage { index: 0, used: 0 });
        Ok(())
    }
}
