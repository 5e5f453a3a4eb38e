// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! ELF loading: turns an executable on disk into the named DWARF section
//! slices consumed by [`crate::dwarf`].
//!
//! The input file is `mmap`ed and sections are handed out as borrowed slices
//! whenever possible. `SHF_COMPRESSED` debug sections are decompressed into
//! memory, or into an anonymous temporary file when they are too large to
//! keep resident.

use crate::{AnyError, VirtAddr};

use std::io::Read as _;
use std::{fs, io, ops, path};

use flate2::read::ZlibDecoder;
use memmap2::{Mmap, MmapMut};
use object::{CompressionFormat, Object as _, ObjectSection as _, ObjectSegment as _};
use zstd::stream::read::Decoder as ZstdDecoder;

/// Maximum size of an individual decompressed section to keep in memory.
///
/// Anything larger is read into an anonymous temporary file and `mmap`ed.
const SWAP_THRESH: usize = 16 * 1024 * 1024;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur during object file loading.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Sections are compressed in an unsupported format")]
    UnsupportedCompressionFormat,

    #[error("Object file is too big to be loaded")]
    FileTooBig,

    #[error("IO error")]
    IO(#[from] io::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`object`] errors into ours, with type erasure.
///
/// We erase the type here to prevent leaking [`object`] library types into our
/// public interface. If code needs to special-case based on particular
/// [`object`] errors, we should instead lift them into custom error variants.
impl From<object::Error> for Error {
    fn from(e: object::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

/// Maps an executable into memory.
pub struct File(Mmap);

impl File {
    /// Map the file at the given path into memory.
    pub fn load(path: &path::Path) -> Result<Self> {
        Self::load_file(&fs::File::open(path)?)
    }

    /// Map the given file into memory.
    pub fn load_file(file: &fs::File) -> Result<Self> {
        Ok(Self(unsafe { Mmap::map(file)? }))
    }

    /// Parse the header and create a reader.
    pub fn parse(&self) -> Result<Reader> {
        Ok(Reader(object::File::parse(&self.0[..])?))
    }
}

/// Provides read access to the data in an object file.
///
/// Created via [`File::parse`].
pub struct Reader<'obj>(object::File<'obj>);

impl<'obj> Reader<'obj> {
    /// Loads the section with the given name into memory.
    ///
    /// Returns `Ok(None)` when the file has no section under that name.
    pub fn load_section(&self, name: &[u8]) -> Result<Option<Section<'obj>>> {
        let Some(obj_sec) = self.0.section_by_name_bytes(name) else {
            return Ok(None);
        };

        Ok(Some(Section {
            virt_addr: obj_sec.address(),
            data: SectionData::load_from_obj_sec(&obj_sec)?,
        }))
    }

    /// Loads every DWARF section the decoder cares about.
    pub fn load_dwarf(&self) -> Result<DwarfData<'obj>> {
        Ok(DwarfData {
            debug_info: self.load_section(b".debug_info")?,
            debug_abbrev: self.load_section(b".debug_abbrev")?,
            debug_str: self.load_section(b".debug_str")?,
            debug_line: self.load_section(b".debug_line")?,
            debug_ranges: self.load_section(b".debug_ranges")?,
            debug_loc: self.load_section(b".debug_loc")?,
            debug_aranges: self.load_section(b".debug_aranges")?,
        })
    }

    /// Checks whether this file has little-endian byte-order.
    pub fn is_little_endian(&self) -> bool {
        self.0.is_little_endian()
    }

    /// Lowest virtual address of any loadable segment.
    ///
    /// This is the bias that the usual address normalizer subtracts to turn
    /// link-time addresses into module-relative ones. Zero when the file has
    /// no loadable segments (e.g. a separate debug-info file).
    pub fn image_base(&self) -> VirtAddr {
        self.0
            .segments()
            .map(|seg| seg.address())
            .min()
            .unwrap_or(0)
    }
}

/// The raw DWARF sections of one executable.
///
/// Owns any decompressed section payloads; [`DwarfData::borrow`] produces the
/// plain-slice view that the parser consumes. Missing sections borrow as
/// empty slices.
pub struct DwarfData<'obj> {
    /// `.debug_info`.
    pub debug_info: Option<Section<'obj>>,
    /// `.debug_abbrev`.
    pub debug_abbrev: Option<Section<'obj>>,
    /// `.debug_str`.
    pub debug_str: Option<Section<'obj>>,
    /// `.debug_line`.
    pub debug_line: Option<Section<'obj>>,
    /// `.debug_ranges`.
    pub debug_ranges: Option<Section<'obj>>,
    /// `.debug_loc`.
    pub debug_loc: Option<Section<'obj>>,
    /// `.debug_aranges`.
    pub debug_aranges: Option<Section<'obj>>,
}

impl<'obj> DwarfData<'obj> {
    /// Borrows the section bundle as the slice view the parser wants.
    pub fn borrow(&self) -> crate::dwarf::Sections<'_> {
        fn slice<'a>(sec: &'a Option<Section<'_>>) -> &'a [u8] {
            sec.as_deref().unwrap_or(&[])
        }

        crate::dwarf::Sections {
            debug_info: slice(&self.debug_info),
            debug_abbrev: slice(&self.debug_abbrev),
            debug_str: slice(&self.debug_str),
            debug_line: slice(&self.debug_line),
            debug_ranges: slice(&self.debug_ranges),
            debug_loc: slice(&self.debug_loc),
            debug_aranges: slice(&self.debug_aranges),
        }
    }
}

/// Information and raw data of an object file section.
#[derive(Debug)]
pub struct Section<'obj> {
    virt_addr: VirtAddr,
    data: SectionData<'obj>,
}

impl<'obj> Section<'obj> {
    /// Returns the virtual address of the first byte of this section.
    pub fn virt_addr(&self) -> VirtAddr {
        self.virt_addr
    }
}

/// Allow using section objects where slices are expected.
impl<'obj> ops::Deref for Section<'obj> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.data {
            SectionData::Borrowed(x) => x,
            SectionData::InMemory(x) => &x[..],
            SectionData::Swapped(x) => &x[..],
        }
    }
}

/// Storage for object file sections.
enum SectionData<'obj> {
    /// Section was uncompressed in the input file and we simply kept a ref.
    Borrowed(&'obj [u8]),

    /// Section was originally compressed and we decompressed it into memory.
    InMemory(Vec<u8>),

    /// Section was originally compressed and we decompressed it into a
    /// memory-mapped temporary file.
    Swapped(MmapMut),
}

impl<'obj> SectionData<'obj> {
    /// Load the data from the given [`object::Section`], decompressing if
    /// necessary.
    fn load_from_obj_sec(sec: &object::Section<'obj, '_>) -> Result<Self> {
        let data = sec.compressed_data()?;

        let final_size: usize = data
            .uncompressed_size
            .try_into()
            .map_err(|_| Error::FileTooBig)?;

        let decoder: Box<dyn io::Read> = match data.format {
            CompressionFormat::Zlib => Box::new(ZlibDecoder::new(data.data)),
            CompressionFormat::Zstandard => Box::new(ZstdDecoder::new(data.data)?),
            CompressionFormat::None => return Ok(SectionData::Borrowed(data.data)),
            _ => return Err(Error::UnsupportedCompressionFormat),
        };

        let mut decoder = decoder.take(final_size as u64);

        if final_size >= SWAP_THRESH {
            let mut file = tempfile::tempfile()?;
            io::copy(&mut decoder, &mut file)?;
            let mmap = unsafe { MmapMut::map_mut(&file)? };
            Ok(SectionData::Swapped(mmap))
        } else {
            let mut mem_buf = Vec::with_capacity(final_size);
            decoder.read_to_end(&mut mem_buf)?;
            Ok(SectionData::InMemory(mem_buf))
        }
    }
}

impl<'obj> std::fmt::Debug for SectionData<'obj> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (storage, len) = match self {
            Self::Borrowed(x) => ("borrowed", x.len()),
            Self::InMemory(x) => ("in-memory", x.len()),
            Self::Swapped(x) => ("mmapped", x.len()),
        };

        write!(f, "SectionData([{} bytes, {}])", len, storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::write::{Object, StandardSegment};
    use object::SectionKind;
    use std::io::{Seek as _, Write as _};

    /// Synthesize a tiny ELF with a `.debug_info` payload on disk.
    fn write_test_elf(payload: &[u8]) -> fs::File {
        let mut obj = Object::new(
            object::BinaryFormat::Elf,
            object::Architecture::X86_64,
            object::Endianness::Little,
        );

        let seg = obj.segment_name(StandardSegment::Debug).to_vec();
        let sec = obj.add_section(seg, b".debug_info".to_vec(), SectionKind::Debug);
        obj.append_section_data(sec, payload, 1);

        let bytes = obj.write().unwrap();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&bytes).unwrap();
        file.seek(io::SeekFrom::Start(0)).unwrap();
        file
    }

    #[test]
    fn load_debug_section() {
        let payload = b"\x01\x02\x03\x04 not real dwarf";
        let file = write_test_elf(payload);

        let mapped = File::load_file(&file).unwrap();
        let reader = mapped.parse().unwrap();
        assert!(reader.is_little_endian());

        let dwarf = reader.load_dwarf().unwrap();
        let sections = dwarf.borrow();
        assert_eq!(sections.debug_info, payload);
        assert!(sections.debug_abbrev.is_empty());
        assert!(sections.debug_line.is_empty());
    }

    #[test]
    fn missing_section() {
        let file = write_test_elf(b"x");
        let mapped = File::load_file(&file).unwrap();
        let reader = mapped.parse().unwrap();
        assert!(reader.load_section(b".no_such_section").unwrap().is_none());
    }
}
