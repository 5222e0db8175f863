use crate::block::BlockReader;
use crate::config::{LayoutConfig, ReadOptions, SectionOrder};
use crate::dex::merge::MergeOptions;
use crate::dex::section_list::SectionList;
use crate::dex::section_type::{DEXLIB2_ORDER, R8_ORDER};
use crate::error::{ErrorKind, Result};
use adler::adler32_slice;
use log::{debug, info};
use sha1::{Digest, Sha1};
use std::io;

const CHECKSUM_START: usize = 12;
const SIGNATURE_START: usize = 32;

/// A DEX file held as a [`SectionList`], with the header checksum and signature kept in
/// step with the bytes.
#[derive(Debug, Default)]
pub struct DexLayout {
    sections: SectionList,
}

fn compute_sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Runs `pass` until it returns the same checksum twice in a row, at most `trials` times.
/// Returns the number of passes made.
fn settle<F>(trials: usize, mut pass: F) -> Result<usize>
where
    F: FnMut() -> u32,
{
    let mut previous = None;
    for trial in 0..trials {
        let checksum = pass();
        if previous == Some(checksum) {
            return Ok(trial + 1);
        }
        previous = Some(checksum);
    }
    Err(ErrorKind::RefreshDivergence { trials }.into())
}

impl DexLayout {
    pub fn new() -> Self {
        DexLayout::with_config(LayoutConfig::default())
    }

    pub fn with_config(config: LayoutConfig) -> Self {
        DexLayout { sections: SectionList::new(config) }
    }

    pub fn read(bytes: &[u8]) -> Result<DexLayout> {
        DexLayout::read_with(bytes, &ReadOptions::default(), LayoutConfig::default())
    }

    pub fn read_with(bytes: &[u8], options: &ReadOptions, config: LayoutConfig) -> Result<DexLayout> {
        let sections = SectionList::read(&BlockReader::new(bytes), config)?;
        if options.verify_checksum {
            let (expected, file_size) = sections.header().map_or((0, 0), |h| (h.checksum, h.file_size as usize));
            let end = file_size.min(bytes.len());
            let actual = if end > CHECKSUM_START { adler32_slice(&bytes[CHECKSUM_START..end]) } else { 0 };
            if actual != expected {
                fail!(("checksum is {expected:#010x}, content hashes to {actual:#010x}"), ("dex header"));
            }
        }
        debug!("[read] dex with {} sections, {} bytes", sections.len(), bytes.len());
        Ok(DexLayout { sections })
    }

    pub fn sections(&self) -> &SectionList {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut SectionList {
        &mut self.sections
    }

    pub fn config(&self) -> &LayoutConfig {
        self.sections.config()
    }

    pub fn checksum(&self) -> u32 {
        self.sections.header().map_or(0, |h| h.checksum)
    }

    /// One layout pass, then the signature over bytes `[32..]` and the checksum over
    /// bytes `[12..]`. Returns the new checksum.
    pub fn refresh(&mut self) -> u32 {
        self.sections.refresh();
        let mut bytes = self.sections.to_bytes();
        if bytes.len() < SIGNATURE_START {
            return 0;
        }
        let signature = compute_sha1(&bytes[SIGNATURE_START..]);
        bytes[CHECKSUM_START..SIGNATURE_START].copy_from_slice(&signature);
        let checksum = adler32_slice(&bytes[CHECKSUM_START..]);
        if let Some(header) = self.sections.header_mut() {
            header.signature = signature;
            header.checksum = checksum;
        }
        checksum
    }

    /// Refreshes until two passes in a row produce the same checksum.
    pub fn refresh_full(&mut self) -> Result<()> {
        let trials = self.config().max_refresh_trials;
        let passes = settle(trials, || self.refresh())?;
        debug!("[refresh] stable after {passes} passes");
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.sections.to_bytes()
    }

    pub fn write_to<W: io::Write>(&self, writer: &mut W) -> Result<usize> {
        let bytes = self.to_bytes();
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Applies the configured section order. `SectionOrder::Default` keeps the current one.
    pub fn sort_sections(&mut self) {
        match self.config().section_order {
            SectionOrder::Default => {}
            SectionOrder::R8 => self.sections.sort_sections(R8_ORDER),
            SectionOrder::Dexlib2 => self.sections.sort_sections(DEXLIB2_ORDER),
        }
    }

    /// Drops unused and duplicate records, then refreshes fully.
    pub fn shrink(&mut self) -> Result<usize> {
        let removed = self.sections.shrink();
        info!("[shrink] removed {removed} records and sections");
        self.refresh_full()?;
        Ok(removed)
    }

    /// Moves as many classes of `source` as fit into this file; see
    /// [`SectionList::merge_all`].
    pub fn merge(&mut self, source: &mut DexLayout, options: &mut dyn MergeOptions) -> Result<bool> {
        let all = self.sections.merge_all(&mut source.sections, options);
        self.refresh_full()?;
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::{tag, ClassId, DefaultMergeOptions, Key};

    fn layout_with(classes: &[&str]) -> DexLayout {
        let mut dex = DexLayout::new();
        for class in classes {
            dex.sections_mut().get_or_create_class(class);
        }
        dex.sections_mut().sort_strings();
        dex.refresh_full().unwrap();
        dex
    }

    #[test]
    fn refresh_full_settles_checksum_and_signature() {
        let dex = layout_with(&["Lcom/example/App;"]);
        let bytes = dex.to_bytes();
        assert_eq!(&bytes[..8], b"dex\n035\0");
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), adler32_slice(&bytes[12..]));
        assert_eq!(&bytes[12..32], &compute_sha1(&bytes[32..]));
        assert_eq!(u32::from_le_bytes(bytes[32..36].try_into().unwrap()) as usize, bytes.len());

        let options = ReadOptions { verify_checksum: true, ..Default::default() };
        let back = DexLayout::read_with(&bytes, &options, LayoutConfig::default()).unwrap();
        assert_eq!(back.to_bytes(), bytes);
    }

    #[test]
    fn corrupted_bytes_fail_checksum_verification() {
        let mut bytes = layout_with(&["LA;"]).to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let options = ReadOptions { verify_checksum: true, ..Default::default() };
        assert!(DexLayout::read_with(&bytes, &options, LayoutConfig::default()).is_err());
    }

    #[test]
    fn a_single_trial_cannot_settle() {
        let mut dex = DexLayout::with_config(LayoutConfig { max_refresh_trials: 1, ..Default::default() });
        let err = dex.refresh_full().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::RefreshDivergence { trials: 1 }));
    }

    #[test]
    fn settle_stops_at_the_first_repeat() {
        let mut checksums = [5u32, 7, 7, 9].into_iter();
        assert_eq!(settle(10, || checksums.next().unwrap_or(0)).unwrap(), 3);
    }

    #[test]
    fn oscillating_layout_diverges() {
        let mut flip = false;
        let err = settle(10, || {
            flip = !flip;
            if flip { 1 } else { 2 }
        })
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::RefreshDivergence { trials: 10 }));
    }

    #[test]
    fn dexlib2_order_moves_string_data_ahead_of_code() {
        let config = LayoutConfig { section_order: SectionOrder::Dexlib2, ..Default::default() };
        let mut dex = DexLayout::with_config(config);
        dex.sections_mut().get_or_create_class("LA;");
        dex.sections_mut().get_or_create_section::<crate::dex::Code>().add(crate::dex::Code::new(1, 0, 0, vec![0x000e]));
        dex.sort_sections();
        let tags = dex.sections().tags();
        let position = |t| tags.iter().position(|&x| x == t).unwrap();
        assert!(position(tag::CLASS_ID) < position(tag::STRING_DATA));
        assert!(position(tag::STRING_DATA) < position(tag::CODE));
    }

    #[test]
    fn merge_refreshes_the_destination() {
        let mut source = layout_with(&["LA;", "LB;"]);
        let mut dest = DexLayout::new();
        assert!(dest.merge(&mut source, &mut DefaultMergeOptions).unwrap());
        assert_eq!(dest.sections().section::<ClassId>().unwrap().len(), 2);
        assert!(dest.sections().contains(&Key::Class("LB;".into())));
        let bytes = dest.to_bytes();
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), adler32_slice(&bytes[12..]));
    }
}
