//! Integration tests for the flash-backed EEPROM emulation
//!
//! Covers:
//! - Formatting blank media and byte/block round trips
//! - Page transfer when the valid page fills up
//! - Full-store handling at init (reformat once / refuse)
//! - Recovery from interrupted transfers and torn records

mod common;

use common::RamFlash;
use sensornet::config::{
    ConfigStore, EepromEmulation, EepromLayout, FullPolicy, InitOutcome, StoreError, EMPTY_VALUE,
};
use sensornet::hal::FlashError;

const LAYOUT: EepromLayout = EepromLayout::STM32F1;

fn fresh_store() -> EepromEmulation<RamFlash> {
    let mut store = EepromEmulation::new(RamFlash::stm32f1(), LAYOUT);
    assert_eq!(store.init(), Ok(InitOutcome::Formatted));
    store
}

/// Simulate a reboot: same flash, new store instance.
fn reopen(store: EepromEmulation<RamFlash>) -> EepromEmulation<RamFlash> {
    EepromEmulation::new(store.into_inner(), LAYOUT)
}

/// Fill the valid page with `max_entries` distinct addresses.
fn fill_page(store: &mut EepromEmulation<RamFlash>) {
    for address in 0..store.max_entries() {
        store.write_byte(address, 0x01).unwrap();
    }
    assert_eq!(store.used_entries(), store.max_entries());
}

#[test]
fn test_blank_flash_is_formatted() {
    let store = fresh_store();

    assert_eq!(store.active_page(), Some(0));
    assert_eq!(store.used_entries(), 0);
    assert_eq!(store.flash().contents(LAYOUT.page(0), 2), vec![0x00, 0x00]);
    assert_eq!(store.flash().contents(LAYOUT.page(1), 4), vec![0xFF; 4]);
}

#[test]
fn test_write_then_read_byte() {
    let mut store = fresh_store();

    store.write_byte(10, 0x42).unwrap();
    assert_eq!(store.read_byte(10), Ok(0x42));
}

#[test]
fn test_unwritten_address_reads_empty() {
    let mut store = fresh_store();

    assert_eq!(store.read_byte(0), Ok(EMPTY_VALUE));
    assert_eq!(store.read_byte(2047), Ok(EMPTY_VALUE));
}

#[test]
fn test_block_round_trip() {
    let mut store = fresh_store();
    let data: Vec<u8> = (0..200u32).map(|i| (i * 7 + 3) as u8).collect();

    store.write_block(&data, 1800).unwrap();

    let mut back = vec![0u8; data.len()];
    store.read_block(&mut back, 1800).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_block_at_end_of_window() {
    let mut store = fresh_store();

    store.write_block(&[1, 2, 3, 4, 5, 6, 7, 8], 2040).unwrap();

    let mut back = [0u8; 8];
    store.read_block(&mut back, 2040).unwrap();
    assert_eq!(back, [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_out_of_range_block_writes_nothing() {
    let mut store = fresh_store();
    let writes_before = store.flash().write_count();

    assert_eq!(
        store.write_block(&[1, 2], 2047),
        Err(StoreError::OutOfRange { address: 2047, len: 2 })
    );
    assert_eq!(store.flash().write_count(), writes_before);
    assert_eq!(store.read_byte(2047), Ok(EMPTY_VALUE));
    assert!(matches!(store.read_byte(2048), Err(StoreError::OutOfRange { .. })));
}

#[test]
fn test_access_before_init_fails() {
    let mut store = EepromEmulation::new(RamFlash::stm32f1(), LAYOUT);

    assert_eq!(store.read_byte(0), Err(StoreError::NotInitialized));
    assert_eq!(store.write_byte(0, 1), Err(StoreError::NotInitialized));
}

#[test]
fn test_unchanged_writes_use_no_entries() {
    let mut store = fresh_store();

    store.write_byte(7, EMPTY_VALUE).unwrap();
    assert_eq!(store.used_entries(), 0);

    store.write_byte(7, 3).unwrap();
    store.write_byte(7, 3).unwrap();
    assert_eq!(store.used_entries(), 1);
}

#[test]
fn test_content_survives_reopen() {
    let mut store = fresh_store();
    store.write_block(b"hello", 100).unwrap();

    let mut store = reopen(store);
    assert_eq!(store.init(), Ok(InitOutcome::Ready));
    assert_eq!(store.used_entries(), 5);

    let mut back = [0u8; 5];
    store.read_block(&mut back, 100).unwrap();
    assert_eq!(&back, b"hello");
}

#[test]
fn test_page_transfer_moves_to_other_page() {
    let mut store = fresh_store();

    for i in 0..300u32 {
        store.write_byte(0, (i % 200) as u8 + 1).unwrap();
    }

    assert_eq!(store.active_page(), Some(1));
    assert_eq!(store.used_entries(), 45);
    assert_eq!(store.read_byte(0), Ok(100));
    // Format erased both pages once, the transfer erased page 0 again.
    assert_eq!(store.flash().erase_count(0), 2);
    assert_eq!(store.flash().erase_count(1), 1);
}

#[test]
fn test_page_transfer_keeps_newest_value_per_address() {
    let mut store = fresh_store();
    for address in 0..10u16 {
        store.write_byte(address, address as u8 + 10).unwrap();
    }

    for n in 0..300u32 {
        store.write_byte(5, (n % 100) as u8).unwrap();
    }

    assert_eq!(store.active_page(), Some(1));
    for address in 0..10u16 {
        let expected = if address == 5 { 99 } else { address as u8 + 10 };
        assert_eq!(store.read_byte(address), Ok(expected), "address {}", address);
    }
}

#[test]
fn test_page_transfer_drops_cleared_addresses() {
    let mut store = fresh_store();
    store.write_byte(0, 1).unwrap();
    store.write_byte(0, EMPTY_VALUE).unwrap();
    for n in 0..253u32 {
        store.write_byte(1, (n % 2) as u8 + 1).unwrap();
    }
    assert_eq!(store.used_entries(), store.max_entries());

    store.write_byte(2, 7).unwrap();

    assert_eq!(store.used_entries(), 2);
    assert_eq!(store.read_byte(0), Ok(EMPTY_VALUE));
    assert_eq!(store.read_byte(1), Ok(1));
    assert_eq!(store.read_byte(2), Ok(7));
}

#[test]
fn test_write_fails_when_live_set_does_not_fit() {
    let mut store = fresh_store();
    fill_page(&mut store);
    let erases_before = store.flash().total_erase_count();

    assert_eq!(store.write_byte(255, 0x01), Err(StoreError::Full));

    assert_eq!(store.flash().total_erase_count(), erases_before);
    assert_eq!(store.active_page(), Some(0));
    assert_eq!(store.read_byte(0), Ok(0x01));
    assert_eq!(store.read_byte(255), Ok(EMPTY_VALUE));
}

#[test]
fn test_overwrite_on_full_page_compacts() {
    let mut store = fresh_store();
    fill_page(&mut store);

    store.write_byte(10, 0x02).unwrap();

    assert_eq!(store.active_page(), Some(1));
    assert_eq!(store.read_byte(10), Ok(0x02));
    assert_eq!(store.read_byte(254), Ok(0x01));
}

#[test]
fn test_full_store_reformats_exactly_once() {
    let mut store = fresh_store();
    fill_page(&mut store);
    let erases_before = store.flash().total_erase_count();

    let mut store = reopen(store);
    assert_eq!(store.init(), Ok(InitOutcome::Reformatted));
    assert_eq!(store.flash().total_erase_count(), erases_before + 2);
    assert_eq!(store.used_entries(), 0);
    assert_eq!(store.read_byte(0), Ok(EMPTY_VALUE));
    assert_eq!(store.read_byte(100), Ok(EMPTY_VALUE));

    let mut store = reopen(store);
    assert_eq!(store.init(), Ok(InitOutcome::Ready));
    assert_eq!(store.flash().total_erase_count(), erases_before + 2);
}

#[test]
fn test_refuse_policy_keeps_full_store() {
    let mut store = fresh_store();
    fill_page(&mut store);

    let mut store = reopen(store).with_policy(FullPolicy::Refuse);
    assert_eq!(store.init(), Err(StoreError::Full));
    assert_eq!(store.read_byte(0), Ok(0x01));
}

#[test]
fn test_interrupted_transfer_discards_receive_page() {
    let mut store = fresh_store();
    store.write_byte(1, 0x11).unwrap();

    // Transfer started: page 1 marked RECEIVE with a partial copy.
    store.flash_mut().poke(LAYOUT.page(1), &[0xEE, 0xEE, 0xFF, 0xFF, 1, 0, 0x22, 0]);

    let mut store = reopen(store);
    assert_eq!(store.init(), Ok(InitOutcome::Ready));
    assert_eq!(store.active_page(), Some(0));
    assert_eq!(store.read_byte(1), Ok(0x11));
    assert_eq!(store.flash().contents(LAYOUT.page(1), 8), vec![0xFF; 8]);
}

#[test]
fn test_completed_transfer_is_promoted() {
    let mut flash = RamFlash::stm32f1();
    // Copy finished and the old page erased, but the new page is not yet VALID.
    flash.poke(LAYOUT.page(0), &[0xEE, 0xEE, 0xFF, 0xFF, 3, 0, 7, 0]);

    let mut store = EepromEmulation::new(flash, LAYOUT);
    assert_eq!(store.init(), Ok(InitOutcome::Ready));
    assert_eq!(store.active_page(), Some(0));
    assert_eq!(store.read_byte(3), Ok(7));
    assert_eq!(store.flash().contents(LAYOUT.page(0), 2), vec![0x00, 0x00]);
}

#[test]
fn test_corrupt_header_is_formatted() {
    let mut flash = RamFlash::stm32f1();
    flash.poke(LAYOUT.page(0), &[0x34, 0x12, 0xFF, 0xFF, 3, 0, 7, 0]);

    let mut store = EepromEmulation::new(flash, LAYOUT);
    assert_eq!(store.init(), Ok(InitOutcome::Formatted));
    assert_eq!(store.read_byte(3), Ok(EMPTY_VALUE));
}

#[test]
fn test_reset_after_old_page_erase_keeps_content() {
    let mut store = fresh_store();
    store.write_byte(100, 0x42).unwrap();
    for n in 0..254u32 {
        store.write_byte(1, (n % 2) as u8 + 1).unwrap();
    }
    assert_eq!(store.used_entries(), store.max_entries());

    // The copy lands on page 1, then the reset hits right after page 0 is erased.
    store.flash_mut().simulate_reset_after_erase();
    assert_eq!(
        store.write_byte(2, 7),
        Err(StoreError::Flash(FlashError::EraseFailed))
    );
    assert_eq!(store.flash().contents(LAYOUT.page(0), 2), vec![0xFF, 0xFF]);
    assert_eq!(store.flash().contents(LAYOUT.page(1), 2), vec![0xEE, 0xEE]);
    assert_eq!(store.read_byte(100), Err(StoreError::NotInitialized));

    let mut store = reopen(store);
    assert_eq!(store.init(), Ok(InitOutcome::Ready));
    assert_eq!(store.active_page(), Some(1));
    assert_eq!(store.read_byte(100), Ok(0x42));
    assert_eq!(store.read_byte(1), Ok(2));
    assert_eq!(store.read_byte(2), Ok(7));
}

#[test]
fn test_oversized_block_writes_nothing() {
    let mut store = fresh_store();
    store.write_byte(1000, 0x42).unwrap();
    let writes_before = store.flash().write_count();

    // 300 live addresses never fit in one page.
    assert_eq!(store.write_block(&[0x11; 300], 0), Err(StoreError::Full));

    assert_eq!(store.flash().write_count(), writes_before);
    assert_eq!(store.used_entries(), 1);
    let mut back = [0u8; 300];
    store.read_block(&mut back, 0).unwrap();
    assert_eq!(back, [EMPTY_VALUE; 300]);
    assert_eq!(store.read_byte(1000), Ok(0x42));
}

#[test]
fn test_block_up_to_live_budget_round_trips() {
    let mut store = fresh_store();
    store.write_byte(2000, 0x01).unwrap();

    let data = vec![0x5A; store.max_entries() as usize - 1];
    store.write_block(&data, 0).unwrap();

    let mut back = vec![0u8; data.len()];
    store.read_block(&mut back, 0).unwrap();
    assert_eq!(back, data);
    assert_eq!(store.write_block(&[0x5A], 1500), Err(StoreError::Full));

    // Clearing an address frees budget for another one in the same block.
    store.write_block(&[EMPTY_VALUE], 2000).unwrap();
    store.write_block(&[0x5A], 1500).unwrap();
    assert_eq!(store.read_byte(1500), Ok(0x5A));
    assert_eq!(store.read_byte(2000), Ok(EMPTY_VALUE));
}

#[test]
fn test_torn_record_is_ignored() {
    let mut store = fresh_store();
    store.write_byte(1, 5).unwrap();

    store.flash_mut().simulate_power_loss();
    assert_eq!(
        store.write_byte(2, 9),
        Err(StoreError::Flash(FlashError::WriteFailed))
    );
    assert_eq!(store.read_byte(2), Ok(EMPTY_VALUE));

    // The torn slot is never reused.
    store.write_byte(3, 4).unwrap();
    assert_eq!(store.used_entries(), 3);
    assert_eq!(store.read_byte(2), Ok(EMPTY_VALUE));
    assert_eq!(store.read_byte(3), Ok(4));

    let mut store = reopen(store);
    assert_eq!(store.init(), Ok(InitOutcome::Ready));
    assert_eq!(store.used_entries(), 3);
    assert_eq!(store.read_byte(1), Ok(5));
    assert_eq!(store.read_byte(2), Ok(EMPTY_VALUE));
    assert_eq!(store.read_byte(3), Ok(4));
}

#[test]
fn test_format_erases_everything() {
    let mut store = fresh_store();
    store.write_byte(42, 0x24).unwrap();

    store.format().unwrap();

    assert_eq!(store.used_entries(), 0);
    assert_eq!(store.read_byte(42), Ok(EMPTY_VALUE));
}
