// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Lazy decoder for `.debug_abbrev` tables.

use super::consts::*;
use super::reader::Reader;
use super::Result;
use smallvec::SmallVec;
use std::collections::HashMap;

/// One `(attribute, form)` pair of an abbreviation declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    /// Which attribute the value belongs to.
    pub attr: DwAt,
    /// How the value is encoded.
    pub form: DwForm,
}

/// Decoded abbreviation: the schema for one DIE shape.
#[derive(Debug, Clone)]
pub struct Abbrev {
    /// The DIE tag.
    pub tag: DwTag,
    /// Whether DIEs using this abbreviation own children.
    pub has_children: bool,
    /// Attribute list in declaration order.
    pub attrs: SmallVec<[AttrSpec; 8]>,
}

/// Lazy map from a CU-local abbreviation code to its declaration.
///
/// Declarations are decoded on demand: a lookup scans forward from where the
/// previous one stopped, memoizing every declaration on the way, so repeated
/// lookups are amortized O(1) and a table is never decoded past the largest
/// code the CU actually uses.
pub struct AbbrevTable<'data> {
    reader: Reader<'data>,
    exhausted: bool,
    known: HashMap<u64, Abbrev>,
}

impl<'data> AbbrevTable<'data> {
    /// Creates a table decoding from `offset` of `.debug_abbrev`.
    pub fn new(debug_abbrev: &'data [u8], offset: u64) -> Result<Self> {
        Ok(Self {
            reader: Reader::new_at(debug_abbrev, offset as usize)?,
            exhausted: false,
            known: HashMap::new(),
        })
    }

    /// Looks up the declaration for `code`.
    ///
    /// Returns `Ok(None)` when the table ends without declaring the code.
    pub fn get(&mut self, code: u64) -> Result<Option<&Abbrev>> {
        // The obvious `if let Some(x) = self.known.get(...)` runs afoul of
        // the borrow checker here, hence the contains_key dance.
        while !self.known.contains_key(&code) && !self.exhausted {
            if !self.decode_next()? {
                self.exhausted = true;
            }
        }

        Ok(self.known.get(&code))
    }

    /// Decodes the next declaration; false once the terminator is reached.
    fn decode_next(&mut self) -> Result<bool> {
        let code = self.reader.uleb128()?;
        if code == 0 {
            return Ok(false);
        }

        let tag = DwTag(self.reader.uleb128()? as u16);
        let has_children = self.reader.u8()? != 0;

        let mut attrs = SmallVec::new();
        loop {
            let attr = self.reader.uleb128()?;
            let form = self.reader.uleb128()?;
            if attr == 0 && form == 0 {
                break;
            }
            attrs.push(AttrSpec {
                attr: DwAt(attr as u16),
                form: DwForm(form as u16),
            });
        }

        self.known.insert(
            code,
            Abbrev {
                tag,
                has_children,
                attrs,
            },
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two declarations followed by the table terminator.
    fn sample_table() -> Vec<u8> {
        let mut out = Vec::new();

        // Code 1: compile_unit, has children, name=string.
        out.extend([0x01, 0x11, 0x01]);
        out.extend([0x03, 0x08]); // DW_AT_name, DW_FORM_string
        out.extend([0x00, 0x00]);

        // Code 2: base_type, no children, name=string + byte_size=data1.
        out.extend([0x02, 0x24, 0x00]);
        out.extend([0x03, 0x08]);
        out.extend([0x0b, 0x0b]); // DW_AT_byte_size, DW_FORM_data1
        out.extend([0x00, 0x00]);

        out.push(0x00); // end of table
        out
    }

    #[test]
    fn decode_and_memoize() {
        let data = sample_table();
        let mut table = AbbrevTable::new(&data, 0).unwrap();

        let two = table.get(2).unwrap().unwrap();
        assert_eq!(two.tag, DW_TAG_base_type);
        assert!(!two.has_children);
        assert_eq!(
            two.attrs[..],
            [
                AttrSpec {
                    attr: DW_AT_name,
                    form: DW_FORM_string
                },
                AttrSpec {
                    attr: DW_AT_byte_size,
                    form: DW_FORM_data1
                },
            ]
        );

        // Code 1 was memoized on the way to code 2.
        let one = table.get(1).unwrap().unwrap();
        assert_eq!(one.tag, DW_TAG_compile_unit);
        assert!(one.has_children);

        // Unknown codes exhaust the table without failing.
        assert!(table.get(7).unwrap().is_none());
        assert!(table.get(1).unwrap().is_some());
    }

    #[test]
    fn truncated_declaration() {
        // Code present but attribute list cut short.
        let data = [0x01, 0x11, 0x01, 0x03];
        let mut table = AbbrevTable::new(&data, 0).unwrap();
        assert!(table.get(1).is_err());
    }
}
