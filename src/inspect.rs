//! Classification and bounded previews of opaque driver buffers.
//!
//! Buffers are identified by a handle and a type tag from an enumeration the
//! driver owns. Classification is a table lookup that falls back to
//! [`BufferCategory::Unknown`]; it never fails. Mapping is scoped by
//! [`MappedBuffer`], which unmaps exactly once on every exit path.

use core::fmt;
use std::collections::HashMap;

use crate::error::BufferAccessError;

/// Hard cap on bytes shown in a preview.
pub const PREVIEW_LIMIT: usize = 64;

const HEX_BYTES_PER_LINE: usize = 16;

/// What a driver buffer holds, as far as we can tell from its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BufferCategory {
    PictureParameter,
    IqMatrix,
    BitPlane,
    SliceGroupMap,
    SliceParameter,
    SliceData,
    MacroblockParameter,
    ResidualData,
    DeblockingParameter,
    Image,
    ProtectedSliceData,
    QMatrix,
    HuffmanTable,
    Probability,
    Unknown,
}

impl BufferCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PictureParameter => "PictureParameter",
            Self::IqMatrix => "IQMatrix",
            Self::BitPlane => "BitPlane",
            Self::SliceGroupMap => "SliceGroupMap",
            Self::SliceParameter => "SliceParameter",
            Self::SliceData => "SliceData",
            Self::MacroblockParameter => "MacroblockParameter",
            Self::ResidualData => "ResidualData",
            Self::DeblockingParameter => "DeblockingParameter",
            Self::Image => "Image",
            Self::ProtectedSliceData => "ProtectedSliceData",
            Self::QMatrix => "QMatrix",
            Self::HuffmanTable => "HuffmanTable",
            Self::Probability => "Probability",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the payload is compressed bitstream worth probing.
    pub fn carries_bitstream(&self) -> bool {
        matches!(self, Self::SliceData)
    }

    /// Short description logged ahead of the preview.
    pub fn banner(&self) -> &'static str {
        match self {
            Self::SliceData => "slice data (compressed video)",
            Self::SliceParameter => "slice parameters (decode instructions)",
            Self::PictureParameter => "picture parameters (frame info)",
            _ => "buffer contents",
        }
    }

    /// Prefix of every preview line.
    pub fn preview_prefix(&self) -> &'static str {
        match self {
            Self::SliceData => "DATA",
            Self::SliceParameter => "PARAM",
            Self::PictureParameter => "PIC",
            _ => "MISC",
        }
    }

    /// Bytes previewed for this category, never more than [`PREVIEW_LIMIT`].
    pub fn preview_limit(&self) -> usize {
        match self {
            Self::SliceData | Self::SliceParameter | Self::PictureParameter => PREVIEW_LIMIT,
            _ => PREVIEW_LIMIT / 2,
        }
    }
}

impl fmt::Display for BufferCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// VA-API `VABufferType` codes for the decode-side buffer types.
const VA_BUFFER_TYPES: [(i32, BufferCategory); 14] = [
    (0, BufferCategory::PictureParameter),
    (1, BufferCategory::IqMatrix),
    (2, BufferCategory::BitPlane),
    (3, BufferCategory::SliceGroupMap),
    (4, BufferCategory::SliceParameter),
    (5, BufferCategory::SliceData),
    (6, BufferCategory::MacroblockParameter),
    (7, BufferCategory::ResidualData),
    (8, BufferCategory::DeblockingParameter),
    (9, BufferCategory::Image),
    (10, BufferCategory::ProtectedSliceData),
    (11, BufferCategory::QMatrix),
    (12, BufferCategory::HuffmanTable),
    (13, BufferCategory::Probability),
];

/// Maps driver type tags to categories. Extra codes can be registered as the
/// driver's enumeration grows.
#[derive(Debug, Clone)]
pub struct BufferClassifier {
    table: HashMap<i32, BufferCategory>,
}

impl Default for BufferClassifier {
    fn default() -> Self {
        BufferClassifier {
            table: VA_BUFFER_TYPES.into_iter().collect(),
        }
    }
}

impl BufferClassifier {
    pub fn empty() -> Self {
        BufferClassifier {
            table: HashMap::new(),
        }
    }

    pub fn insert(&mut self, type_tag: i32, category: BufferCategory) -> Option<BufferCategory> {
        self.table.insert(type_tag, category)
    }

    pub fn with(mut self, type_tag: i32, category: BufferCategory) -> Self {
        self.insert(type_tag, category);
        self
    }

    pub fn classify(&self, type_tag: i32) -> BufferCategory {
        self.table
            .get(&type_tag)
            .copied()
            .unwrap_or(BufferCategory::Unknown)
    }
}

/// Fixed-width hex listing of the head of a buffer.
#[derive(Debug, Clone, Copy)]
pub struct HexPreview<'a> {
    prefix: &'a str,
    shown: &'a [u8],
    omitted: usize,
}

impl<'a> HexPreview<'a> {
    pub fn new(prefix: &'a str, data: &'a [u8], limit: usize) -> Self {
        let shown = data.len().min(limit).min(PREVIEW_LIMIT);
        HexPreview {
            prefix,
            shown: &data[..shown],
            omitted: data.len() - shown,
        }
    }

    pub fn omitted(&self) -> usize {
        self.omitted
    }
}

impl fmt::Display for HexPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, line) in self.shown.chunks(HEX_BYTES_PER_LINE).enumerate() {
            if n > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}:", self.prefix)?;
            for byte in line {
                write!(f, " {byte:02x}")?;
            }
        }
        if self.omitted > 0 {
            write!(f, " ... ({} more bytes)", self.omitted)?;
        }
        Ok(())
    }
}

/// Annex B start code found at the head of a bitstream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCode {
    /// `00 00 00 01`
    Long,
    /// `00 00 01`
    Short,
}

impl fmt::Display for StartCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.write_str("NAL start code (00 00 00 01)"),
            Self::Short => f.write_str("short NAL start code (00 00 01)"),
        }
    }
}

/// Prefix check only; this is not a bitstream parser.
pub fn detect_start_code(data: &[u8]) -> Option<StartCode> {
    match data {
        [0, 0, 0, 1, ..] => Some(StartCode::Long),
        [0, 0, 1, ..] => Some(StartCode::Short),
        _ => None,
    }
}

/// Type tag and byte size reported by the driver for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub type_tag: i32,
    pub size: usize,
}

/// Driver entry points needed to look inside a buffer.
///
/// # Safety
///
/// A successful [`map`](BufferMapper::map) must return either null or a
/// pointer readable for the size reported by
/// [`buffer_info`](BufferMapper::buffer_info), valid until the matching
/// [`unmap`](BufferMapper::unmap).
pub unsafe trait BufferMapper {
    type Id: Copy + fmt::Debug;

    fn buffer_info(&self, id: Self::Id) -> Result<BufferInfo, BufferAccessError>;
    fn map(&self, id: Self::Id) -> Result<*const u8, BufferAccessError>;
    fn unmap(&self, id: Self::Id);
}

/// RAII guard for a mapped driver buffer.
pub struct MappedBuffer<'m, M: BufferMapper + ?Sized> {
    mapper: &'m M,
    id: M::Id,
    data: *const u8,
    len: usize,
}

impl<'m, M: BufferMapper + ?Sized> MappedBuffer<'m, M> {
    pub fn map(mapper: &'m M, id: M::Id, len: usize) -> Result<Self, BufferAccessError> {
        let data = mapper.map(id)?;
        Ok(MappedBuffer {
            mapper,
            id,
            data,
            len,
        })
    }

    /// The mapped bytes, or `None` for a null or empty mapping.
    pub fn bytes(&self) -> Option<&[u8]> {
        if self.data.is_null() || self.len == 0 {
            return None;
        }
        // SAFETY: `BufferMapper` guarantees `len` readable bytes until unmap,
        // which only happens when `self` drops.
        Some(unsafe { std::slice::from_raw_parts(self.data, self.len) })
    }
}

impl<M: BufferMapper + ?Sized> Drop for MappedBuffer<'_, M> {
    fn drop(&mut self) {
        self.mapper.unmap(self.id);
    }
}

/// Everything learned about one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedBuffer<Id> {
    pub id: Id,
    pub type_tag: i32,
    pub category: BufferCategory,
    pub size: usize,
    /// Rendered [`HexPreview`], absent for null or empty mappings.
    pub preview: Option<String>,
    pub start_code: Option<StartCode>,
}

impl<Id> fmt::Display for InspectedBuffer<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}), {} bytes",
            self.category, self.type_tag, self.size
        )?;
        if let Some(code) = self.start_code {
            write!(f, ", {code}")?;
        }
        Ok(())
    }
}

/// Classify, map and scan one buffer. The hex preview is rendered only when
/// `with_preview` is set.
pub fn inspect_buffer<M: BufferMapper + ?Sized>(
    mapper: &M,
    classifier: &BufferClassifier,
    id: M::Id,
    with_preview: bool,
) -> Result<InspectedBuffer<M::Id>, BufferAccessError> {
    let info = mapper.buffer_info(id)?;
    let category = classifier.classify(info.type_tag);
    let mapped = MappedBuffer::map(mapper, id, info.size)?;

    let (preview, start_code) = match mapped.bytes() {
        Some(bytes) => {
            let preview = with_preview.then(|| {
                HexPreview::new(category.preview_prefix(), bytes, category.preview_limit())
                    .to_string()
            });
            let start_code = if category.carries_bitstream() {
                detect_start_code(bytes)
            } else {
                None
            };
            (preview, start_code)
        }
        None => (None, None),
    };

    Ok(InspectedBuffer {
        id,
        type_tag: info.type_tag,
        category,
        size: info.size,
        preview,
        start_code,
    })
}

/// Outcome of inspecting one submission's buffers.
#[derive(Debug)]
pub struct BatchReport<Id> {
    pub inspected: Vec<InspectedBuffer<Id>>,
    pub skipped: Vec<(Id, BufferAccessError)>,
}

impl<Id> Default for BatchReport<Id> {
    fn default() -> Self {
        BatchReport {
            inspected: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Inspect every buffer in `ids`. A failure skips only that buffer.
pub fn inspect_batch<M: BufferMapper + ?Sized>(
    mapper: &M,
    classifier: &BufferClassifier,
    ids: &[M::Id],
) -> BatchReport<M::Id> {
    let mut report = BatchReport::default();
    let with_preview = tracing::enabled!(tracing::Level::DEBUG);
    for (index, &id) in ids.iter().enumerate() {
        match inspect_buffer(mapper, classifier, id, with_preview) {
            Ok(buffer) => {
                tracing::debug!(
                    buffer = ?id,
                    position = index + 1,
                    count = ids.len(),
                    "{buffer}"
                );
                if let Some(preview) = &buffer.preview {
                    tracing::debug!("{}:\n{preview}", buffer.category.banner());
                }
                report.inspected.push(buffer);
            }
            Err(error) => {
                tracing::warn!(buffer = ?id, %error, "skipping buffer");
                report.skipped.push((id, error));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    /// In-memory driver: buffer id -> (type tag, bytes).
    #[derive(Default)]
    struct FakeDriver {
        buffers: HashMap<u32, (i32, Vec<u8>)>,
        broken_info: Vec<u32>,
        broken_map: Vec<u32>,
        null_map: Vec<u32>,
        maps: RefCell<Vec<u32>>,
        unmaps: RefCell<Vec<u32>>,
    }

    unsafe impl BufferMapper for FakeDriver {
        type Id = u32;

        fn buffer_info(&self, id: u32) -> Result<BufferInfo, BufferAccessError> {
            if self.broken_info.contains(&id) {
                return Err(BufferAccessError::Info { status: 5 });
            }
            let (type_tag, data) = self
                .buffers
                .get(&id)
                .ok_or(BufferAccessError::Info { status: 5 })?;
            Ok(BufferInfo {
                type_tag: *type_tag,
                size: data.len(),
            })
        }

        fn map(&self, id: u32) -> Result<*const u8, BufferAccessError> {
            if self.broken_map.contains(&id) {
                return Err(BufferAccessError::Map { status: 1 });
            }
            self.maps.borrow_mut().push(id);
            if self.null_map.contains(&id) {
                return Ok(std::ptr::null());
            }
            Ok(self.buffers[&id].1.as_ptr())
        }

        fn unmap(&self, id: u32) {
            self.unmaps.borrow_mut().push(id);
        }
    }

    #[test]
    fn unknown_tags_fall_back() {
        let classifier = BufferClassifier::default();
        assert_eq!(classifier.classify(5), BufferCategory::SliceData);
        assert_eq!(classifier.classify(13), BufferCategory::Probability);
        assert_eq!(classifier.classify(14), BufferCategory::Unknown);
        assert_eq!(classifier.classify(-1), BufferCategory::Unknown);

        let extended = classifier.with(14, BufferCategory::Image);
        assert_eq!(extended.classify(14), BufferCategory::Image);
        assert_eq!(BufferClassifier::empty().classify(0), BufferCategory::Unknown);
    }

    #[test]
    fn preview_is_capped_with_note() {
        let data: Vec<u8> = (0..100).collect();
        let preview = HexPreview::new("DATA", &data, 1000);
        assert_eq!(preview.omitted(), 36);

        let text = preview.to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("DATA: 00 01 02"));
        assert_eq!(lines[0].split(' ').count(), 17);
        assert!(lines[3].ends_with("3f ... (36 more bytes)"));
    }

    #[test]
    fn short_preview_has_no_note() {
        let preview = HexPreview::new("PIC", &[0xab, 0x01], 64);
        assert_eq!(preview.to_string(), "PIC: ab 01");
    }

    #[test]
    fn start_codes() {
        assert_eq!(detect_start_code(&[0, 0, 0, 1, 0x67]), Some(StartCode::Long));
        assert_eq!(detect_start_code(&[0, 0, 1, 0x65]), Some(StartCode::Short));
        assert_eq!(detect_start_code(&[0, 0, 1]), Some(StartCode::Short));
        assert_eq!(detect_start_code(&[0, 0]), None);
        assert_eq!(detect_start_code(&[0, 1, 0, 1]), None);
    }

    #[test]
    fn slice_data_is_scanned_and_previewed() {
        let mut driver = FakeDriver::default();
        let mut slice = vec![0, 0, 0, 1, 0x65];
        slice.resize(80, 0xaa);
        driver.buffers.insert(7, (5, slice));
        driver.buffers.insert(8, (0, vec![0, 0, 0, 1]));

        let classifier = BufferClassifier::default();
        let slice = inspect_buffer(&driver, &classifier, 7, true).unwrap();
        assert_eq!(slice.category, BufferCategory::SliceData);
        assert_eq!(slice.start_code, Some(StartCode::Long));
        assert!(slice.preview.unwrap().ends_with("(16 more bytes)"));

        let picture = inspect_buffer(&driver, &classifier, 8, true).unwrap();
        assert_eq!(picture.start_code, None, "only bitstream buffers are scanned");
        assert_eq!(*driver.unmaps.borrow(), vec![7, 8]);
    }

    #[test]
    fn misc_buffers_preview_half_the_cap() {
        let mut driver = FakeDriver::default();
        driver.buffers.insert(1, (11, vec![1; 40]));
        let buffer = inspect_buffer(&driver, &BufferClassifier::default(), 1, true).unwrap();
        let preview = buffer.preview.unwrap();
        assert!(preview.starts_with("MISC:"));
        assert!(preview.ends_with("(8 more bytes)"));
    }

    #[test]
    fn null_or_empty_mapping_has_no_preview_but_is_unmapped() {
        let mut driver = FakeDriver::default();
        driver.buffers.insert(1, (5, vec![0, 0, 1]));
        driver.buffers.insert(2, (5, Vec::new()));
        driver.null_map.push(1);

        let classifier = BufferClassifier::default();
        let null = inspect_buffer(&driver, &classifier, 1, true).unwrap();
        let empty = inspect_buffer(&driver, &classifier, 2, true).unwrap();
        assert_eq!(null.preview, None);
        assert_eq!(null.start_code, None);
        assert_eq!(empty.preview, None);
        assert_eq!(*driver.unmaps.borrow(), vec![1, 2]);
    }

    #[test]
    fn preview_is_skipped_when_not_wanted() {
        let mut driver = FakeDriver::default();
        driver.buffers.insert(3, (5, vec![0, 0, 1, 0x41, 0x9a]));

        let buffer = inspect_buffer(&driver, &BufferClassifier::default(), 3, false).unwrap();
        assert_eq!(buffer.preview, None);
        assert_eq!(buffer.start_code, Some(StartCode::Short));
        assert_eq!(*driver.unmaps.borrow(), vec![3]);
    }

    #[test]
    fn batch_without_debug_logging_renders_no_previews() {
        let mut driver = FakeDriver::default();
        driver.buffers.insert(1, (0, vec![7; 64]));

        // No subscriber is installed, so debug output is disabled.
        let report = inspect_batch(&driver, &BufferClassifier::default(), &[1]);
        assert_eq!(report.inspected[0].preview, None);
        assert_eq!(report.inspected[0].size, 64);
    }

    #[test]
    fn batch_continues_past_failures() {
        let mut driver = FakeDriver::default();
        for id in 1..=5 {
            driver.buffers.insert(id, (4, vec![id as u8; 8]));
        }
        driver.broken_info.push(2);
        driver.broken_map.push(4);

        let report = inspect_batch(&driver, &BufferClassifier::default(), &[1, 2, 3, 4, 5]);
        let inspected: Vec<_> = report.inspected.iter().map(|b| b.id).collect();
        assert_eq!(inspected, vec![1, 3, 5]);
        assert_eq!(
            report.skipped,
            vec![
                (2, BufferAccessError::Info { status: 5 }),
                (4, BufferAccessError::Map { status: 1 })
            ]
        );
        assert_eq!(*driver.maps.borrow(), *driver.unmaps.borrow());
        assert_eq!(*driver.unmaps.borrow(), vec![1, 3, 5]);
    }

    #[test]
    fn guard_unmaps_during_unwind() {
        let mut driver = FakeDriver::default();
        driver.buffers.insert(9, (5, vec![1, 2, 3]));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mapped = MappedBuffer::map(&driver, 9, 3).unwrap();
            let _ = mapped.bytes();
            panic!("inspection blew up");
        }));
        assert!(result.is_err());
        assert_eq!(*driver.unmaps.borrow(), vec![9]);
    }
}
