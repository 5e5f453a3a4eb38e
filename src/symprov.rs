// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The symbol-provider facade.
//!
//! [`SymbolProvider`] is the language-neutral read interface over a parsed
//! debug database: type queries by name or token, field layout, source-line
//! lookup and frame-local enumeration. [`DwarfProvider`] serves it from a
//! [`dwarf::Database`]; a PDB-backed sibling would serve the identical
//! contract, so consumers never know which format fed them.
//!
//! Failure policy: unknown names come back as errors, missing line info
//! comes back as a sentinel row, and malformed debug info never panics.

use crate::dwarf::consts::*;
use crate::dwarf::expr::{self, EvalCtx, MemoryAccess, RegisterAccess};
use crate::dwarf::{self, AttrValue, Database, Symbol, SymbolId};
use crate::{debug, demangle};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Cap on type-graph recursion (typedef chains, nested composites).
const MAX_TYPE_DEPTH: u8 = 32;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the provider contract.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Type token {0} is not valid for this database")]
    BadTypeId(u32),

    #[error("`{type_name}` has no field named `{field}`")]
    FieldNotFound { type_name: String, field: String },

    #[error("Type has no fields")]
    NotComposite,

    #[error("No function contains address {0:#x}")]
    FunctionNotFound(u64),

    #[error(transparent)]
    Dwarf(#[from] dwarf::Error),
}

/// Opaque token identifying a type within one provider.
///
/// Tokens are dense 32-bit integers assigned in DIE traversal order; higher
/// layers may store and compare them but must not interpret them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    /// Reconstructs a token from its raw value.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw token value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Coarse classification of a type.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    /// Primitive type (including the synthetic void).
    Base,
    /// Pointer type.
    Pointer,
    /// Array type.
    Array,
    /// `struct`.
    Struct,
    /// `union`.
    Union,
    /// `class`.
    Class,
    /// Enumeration.
    Enum,
    /// Function or function type.
    Function,
    /// Type alias.
    Typedef,
    /// `const`-qualified wrapper.
    Const,
    /// `volatile`-qualified wrapper.
    Volatile,
    /// l-value reference.
    Reference,
    /// r-value reference.
    RvalueReference,
    /// Anything else.
    Unknown,
}

/// A resolved source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file path; empty when no line info covers the address.
    pub file: String,
    /// 1-based line; 0 when no line info covers the address.
    pub line: u32,
    /// Distance from the row's start address, or the absolute input address
    /// when no line info was found.
    pub displacement: u64,
}

/// Where a frame-local lives at the queried address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarLocation {
    /// In memory, at this address.
    Memory(u64),
    /// In the given DWARF register.
    Register(u16),
    /// Nowhere; this is its value.
    Value(u64),
}

/// One variable or parameter of a stack frame.
#[derive(Debug, Clone)]
pub struct FrameLocal {
    /// Declared name.
    pub name: String,
    /// The variable's type.
    pub type_id: TypeId,
    /// Resolved location.
    pub location: VarLocation,
}

/// The caller's view of one stack frame, for [`SymbolProvider::frame_locals`].
///
/// Everything is optional; locations that need an absent piece of context
/// are silently dropped from the result.
#[derive(Default, Clone, Copy)]
pub struct FrameContext<'a> {
    /// The frame base (CFA or frame-pointer value, per the ABI in use).
    pub frame_base: Option<u64>,
    /// Target memory, for locations that dereference.
    pub memory: Option<&'a dyn MemoryAccess>,
    /// Target registers, for register-relative locations.
    pub registers: Option<&'a dyn RegisterAccess>,
}

/// Uniform read contract over a parsed debug database.
///
/// Served identically by the DWARF backend here and by PDB-backed siblings.
/// All methods are safe to call concurrently.
pub trait SymbolProvider {
    /// Classifies a type.
    fn type_tag(&self, id: TypeId) -> Result<TagKind>;

    /// Size of a type in bytes.
    fn type_size(&self, id: TypeId) -> Result<u64>;

    /// Finds a type by name.
    fn type_id(&self, name: &str) -> Result<TypeId>;

    /// Builds the display name of a type.
    fn type_name(&self, id: TypeId) -> Result<String>;

    /// The pointed-to / aliased / element type.
    fn element_type(&self, id: TypeId) -> Result<TypeId>;

    /// Names of all fields of a composite type, in declaration order with
    /// base-class fields flattened in place.
    fn field_names(&self, id: TypeId) -> Result<Vec<String>>;

    /// A field's type and byte offset within the composite.
    fn field_type_and_offset(&self, id: TypeId, field: &str) -> Result<(TypeId, u64)>;

    /// Source location for an address.
    ///
    /// `relative_address` is in the provider's normalized space and drives
    /// the lookup; `process_address` is echoed back in the sentinel when no
    /// line info exists.
    fn source_line_at(&self, process_address: u64, relative_address: u64) -> Result<SourceLocation>;

    /// Function name and displacement for an address.
    fn function_at(&self, process_address: u64, relative_address: u64) -> Result<(String, u64)>;

    /// Enumerates the parameters (and, unless `arguments_only`, the local
    /// variables) visible at an address of a stack frame.
    fn frame_locals(
        &self,
        frame: &FrameContext<'_>,
        relative_address: u64,
        arguments_only: bool,
    ) -> Result<Vec<FrameLocal>>;
}

fn _assert_obj_safe(_: &dyn SymbolProvider) {}

/// A resolved field of a composite type.
#[derive(Debug, Clone)]
struct Field {
    name: String,
    type_id: TypeId,
    offset: u64,
}

/// Serves the [`SymbolProvider`] contract from a DWARF database.
pub struct DwarfProvider<'data> {
    db: Database<'data>,
    by_name: OnceLock<HashMap<String, SymbolId>>,
}

impl<'data> DwarfProvider<'data> {
    /// Wraps a parsed database.
    pub fn new(db: Database<'data>) -> Self {
        Self {
            db,
            by_name: OnceLock::new(),
        }
    }

    /// The underlying database.
    pub fn database(&self) -> &Database<'data> {
        &self.db
    }

    fn sym(&self, id: TypeId) -> Result<&Symbol<'data>> {
        self.db
            .symbol(SymbolId(id.0))
            .ok_or(Error::BadTypeId(id.0))
    }

    fn sym_by_id(&self, id: SymbolId) -> &Symbol<'data> {
        &self.db.symbols()[id.index()]
    }

    /// The name→type index, built on first use.
    ///
    /// `OnceLock` serializes concurrent first callers, so the index is built
    /// exactly once and everyone observes the same map.
    fn names(&self) -> &HashMap<String, SymbolId> {
        self.by_name.get_or_init(|| {
            let mut map = HashMap::new();
            for (idx, sym) in self.db.symbols().iter().enumerate() {
                if !matches!(
                    sym.tag,
                    DW_TAG_base_type
                        | DW_TAG_structure_type
                        | DW_TAG_class_type
                        | DW_TAG_union_type
                        | DW_TAG_enumeration_type
                        | DW_TAG_typedef
                ) {
                    continue;
                }
                let Some(name) = sym.name() else { continue };
                // First definition wins; later units often repeat types.
                map.entry(name.to_owned())
                    .or_insert_with(|| SymbolId(idx as u32));
            }
            map
        })
    }

    fn tag_kind(sym: &Symbol<'_>) -> TagKind {
        match sym.tag {
            DW_TAG_base_type => TagKind::Base,
            DW_TAG_pointer_type => TagKind::Pointer,
            DW_TAG_array_type => TagKind::Array,
            DW_TAG_structure_type => TagKind::Struct,
            DW_TAG_union_type => TagKind::Union,
            DW_TAG_class_type => TagKind::Class,
            DW_TAG_enumeration_type => TagKind::Enum,
            DW_TAG_subprogram | DW_TAG_subroutine_type => TagKind::Function,
            DW_TAG_typedef => TagKind::Typedef,
            DW_TAG_const_type => TagKind::Const,
            DW_TAG_volatile_type => TagKind::Volatile,
            DW_TAG_reference_type => TagKind::Reference,
            DW_TAG_rvalue_reference_type => TagKind::RvalueReference,
            _ => TagKind::Unknown,
        }
    }

    fn element_of(&self, sym: &Symbol<'data>) -> Result<SymbolId> {
        match sym.attr(DW_AT_type) {
            Some(&AttrValue::ResolvedRef(id)) => Ok(id),
            Some(&AttrValue::Ref(offset)) => {
                Err(dwarf::Error::UnresolvedReference(offset).into())
            }
            _ => Err(dwarf::Error::UnknownType(self.name_of(sym, 0)).into()),
        }
    }

    fn name_of(&self, sym: &Symbol<'data>, depth: u8) -> String {
        if depth > MAX_TYPE_DEPTH {
            return "?".into();
        }
        if let Some(name) = sym.name() {
            return name.to_owned();
        }

        let elem = |suffix: &str, prefix: &str| match sym.type_ref() {
            Some(id) => format!("{prefix}{}{suffix}", self.name_of(self.sym_by_id(id), depth + 1)),
            None => format!("{prefix}void{suffix}"),
        };

        match sym.tag {
            DW_TAG_pointer_type => elem("*", ""),
            DW_TAG_array_type => elem("[]", ""),
            DW_TAG_reference_type => elem("&", ""),
            DW_TAG_rvalue_reference_type => elem("&&", ""),
            DW_TAG_const_type => elem("", "const "),
            DW_TAG_volatile_type => elem("", "volatile "),
            DW_TAG_subroutine_type | DW_TAG_subprogram => "<function>".into(),
            _ => "<anonymous>".into(),
        }
    }

    fn size_of(&self, sym: &Symbol<'data>, depth: u8) -> u64 {
        if depth > MAX_TYPE_DEPTH {
            debug!("type graph too deep while sizing {:?}", sym);
            return 0;
        }
        if let Some(size) = sym.const_attr(DW_AT_byte_size) {
            return size;
        }

        let elem_size = |this: &Self| match sym.type_ref() {
            Some(id) => this.size_of(this.sym_by_id(id), depth + 1),
            None => 0,
        };

        match sym.tag {
            // An unsized pointer is as wide as the unit's addresses.
            DW_TAG_pointer_type | DW_TAG_reference_type | DW_TAG_rvalue_reference_type => {
                self.db.units()[sym.unit as usize].header.address_size as u64
            }
            DW_TAG_typedef | DW_TAG_const_type | DW_TAG_volatile_type | DW_TAG_restrict_type => {
                elem_size(self)
            }
            DW_TAG_array_type => elem_size(self) * self.array_count(sym),
            _ => 0,
        }
    }

    /// Total element count of an array, from its subrange children.
    fn array_count(&self, sym: &Symbol<'data>) -> u64 {
        let mut count = 1;
        for &child in &sym.children {
            let child = self.sym_by_id(child);
            if child.tag != DW_TAG_subrange_type {
                continue;
            }
            count *= match (
                child.const_attr(DW_AT_count),
                child.const_attr(DW_AT_upper_bound),
            ) {
                (Some(n), _) => n,
                (None, Some(ub)) => ub.wrapping_add(1),
                (None, None) => 0,
            };
        }
        count
    }

    /// Follows typedefs and cv-qualifiers down to the underlying type.
    fn strip_aliases(&self, mut id: SymbolId) -> SymbolId {
        for _ in 0..MAX_TYPE_DEPTH {
            let sym = self.sym_by_id(id);
            let is_alias = matches!(
                sym.tag,
                DW_TAG_typedef | DW_TAG_const_type | DW_TAG_volatile_type | DW_TAG_restrict_type
            );
            match (is_alias, sym.type_ref()) {
                (true, Some(next)) => id = next,
                _ => break,
            }
        }
        id
    }

    /// Collects the fields of a composite, flattening base classes and
    /// anonymous members in declaration order.
    fn collect_fields(
        &self,
        sym: &Symbol<'data>,
        base_offset: u64,
        depth: u8,
        out: &mut Vec<Field>,
    ) -> Result<()> {
        if depth > MAX_TYPE_DEPTH {
            return Ok(());
        }

        for &child_id in &sym.children {
            let child = self.sym_by_id(child_id);
            match child.tag {
                DW_TAG_member => {
                    let offset = match self.member_offset(child) {
                        Ok(delta) => base_offset + delta,
                        Err(e) => {
                            debug!("skipping member {:?}: {e}", child);
                            continue;
                        }
                    };
                    let Some(type_id) = child.type_ref() else {
                        continue;
                    };

                    match child.name() {
                        Some(name) => out.push(Field {
                            name: name.to_owned(),
                            type_id: TypeId(type_id.raw()),
                            offset,
                        }),
                        // Anonymous struct/union member: splice its fields in.
                        None => self.collect_fields(
                            self.sym_by_id(type_id),
                            offset,
                            depth + 1,
                            out,
                        )?,
                    }
                }
                DW_TAG_inheritance => {
                    // Virtual bases need a location expression evaluated
                    // against a live object; offsets are not static.
                    if child.attr(DW_AT_virtuality).is_some() {
                        return Err(dwarf::Error::UnsupportedExpression.into());
                    }
                    let offset = base_offset + self.member_offset(child).unwrap_or(0);
                    if let Some(base_ty) = child.type_ref() {
                        let base_ty = self.strip_aliases(base_ty);
                        self.collect_fields(self.sym_by_id(base_ty), offset, depth + 1, out)?;
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Byte offset of a member or base within its enclosing composite.
    fn member_offset(&self, child: &Symbol<'data>) -> Result<u64> {
        match child.attr(DW_AT_data_member_location) {
            // Union members and zero-offset bases omit the attribute.
            None => Ok(0),
            Some(&AttrValue::Const(c)) => Ok(c),
            Some(&AttrValue::Block(block)) | Some(&AttrValue::ExprLoc(block)) => {
                // Member-location expressions expect the object base on the
                // stack; seeding zero yields the plain offset.
                let ctx = EvalCtx {
                    address_size: self.db.units()[child.unit as usize].header.address_size,
                    frame_base: Some(0),
                    ..Default::default()
                };
                match expr::evaluate(block, &ctx)? {
                    expr::Value::Address(offset) => Ok(offset),
                    _ => Err(dwarf::Error::UnsupportedExpression.into()),
                }
            }
            Some(_) => Err(dwarf::Error::UnsupportedExpression.into()),
        }
    }

    fn fields_of(&self, id: TypeId) -> Result<Vec<Field>> {
        self.sym(id)?; // validate the token before indexing
        let resolved = self.strip_aliases(SymbolId(id.0));
        let sym = self.sym_by_id(resolved);

        if !matches!(
            sym.tag,
            DW_TAG_structure_type | DW_TAG_class_type | DW_TAG_union_type
        ) {
            return Err(Error::NotComposite);
        }

        let mut out = Vec::new();
        self.collect_fields(sym, 0, 0, &mut out)?;
        Ok(out)
    }

    /// Resolves the location of one variable DIE at `pc`.
    fn local_location(
        &self,
        var: &Symbol<'data>,
        frame: &FrameContext<'_>,
        pc: u64,
    ) -> Option<VarLocation> {
        let unit = &self.db.units()[var.unit as usize];

        let block = match var.attr(DW_AT_location) {
            Some(&AttrValue::ExprLoc(b)) | Some(&AttrValue::Block(b)) => b,
            // Location list: pick the entry covering the query address.
            Some(&AttrValue::SecOffset(offset)) => self.db.loclist_expr(unit, offset, pc)?,
            _ => {
                // A variable folded into a constant has no storage at all.
                let value = var.const_attr(DW_AT_const_value)?;
                return Some(VarLocation::Value(value));
            }
        };

        let ctx = EvalCtx {
            address_size: unit.header.address_size,
            frame_base: frame.frame_base,
            memory: frame.memory,
            registers: frame.registers,
        };

        match expr::evaluate(block, &ctx) {
            Ok(expr::Value::Address(a)) => Some(VarLocation::Memory(a)),
            Ok(expr::Value::Register(r)) => Some(VarLocation::Register(r)),
            Ok(expr::Value::Constant(c)) => Some(VarLocation::Value(c)),
            Err(e) => {
                debug!("dropping local {:?}: {e}", var);
                None
            }
        }
    }

    /// Walks a function body picking up parameters and visible variables.
    fn collect_locals(
        &self,
        scope: &Symbol<'data>,
        frame: &FrameContext<'_>,
        pc: u64,
        arguments_only: bool,
        out: &mut Vec<FrameLocal>,
    ) {
        for &child_id in &scope.children {
            let child = self.sym_by_id(child_id);
            match child.tag {
                DW_TAG_formal_parameter => {}
                DW_TAG_variable if !arguments_only => {}
                DW_TAG_lexical_block => {
                    if self.scope_contains(child, pc) {
                        self.collect_locals(child, frame, pc, arguments_only, out);
                    }
                    continue;
                }
                _ => continue,
            }

            let Some(name) = child.name() else { continue };
            let Some(location) = self.local_location(child, frame, pc) else {
                continue;
            };
            let type_id = child
                .type_ref()
                .unwrap_or(self.db.units()[child.unit as usize].void);

            out.push(FrameLocal {
                name: name.to_owned(),
                type_id: TypeId(type_id.raw()),
                location,
            });
        }
    }

    /// Whether a lexical block's range covers `pc`. Blocks without address
    /// attributes are treated as covering.
    fn scope_contains(&self, block: &Symbol<'data>, pc: u64) -> bool {
        let lo = match block.attr(DW_AT_low_pc) {
            Some(&AttrValue::Addr(a)) => a,
            _ => return true,
        };
        let hi = match block.attr(DW_AT_high_pc) {
            Some(&AttrValue::Addr(a)) => a,
            Some(&AttrValue::Const(len)) => lo.wrapping_add(len),
            _ => return true,
        };
        (lo..hi).contains(&pc)
    }
}

impl<'data> SymbolProvider for DwarfProvider<'data> {
    fn type_tag(&self, id: TypeId) -> Result<TagKind> {
        Ok(Self::tag_kind(self.sym(id)?))
    }

    fn type_size(&self, id: TypeId) -> Result<u64> {
        Ok(self.size_of(self.sym(id)?, 0))
    }

    fn type_id(&self, name: &str) -> Result<TypeId> {
        match self.names().get(name) {
            Some(&id) => Ok(TypeId(id.raw())),
            None => Err(dwarf::Error::UnknownType(name.to_owned()).into()),
        }
    }

    fn type_name(&self, id: TypeId) -> Result<String> {
        Ok(self.name_of(self.sym(id)?, 0))
    }

    fn element_type(&self, id: TypeId) -> Result<TypeId> {
        let target = self.element_of(self.sym(id)?)?;
        Ok(TypeId(target.raw()))
    }

    fn field_names(&self, id: TypeId) -> Result<Vec<String>> {
        Ok(self.fields_of(id)?.into_iter().map(|f| f.name).collect())
    }

    fn field_type_and_offset(&self, id: TypeId, field: &str) -> Result<(TypeId, u64)> {
        self.fields_of(id)?
            .into_iter()
            .find(|f| f.name == field)
            .map(|f| (f.type_id, f.offset))
            .ok_or_else(|| Error::FieldNotFound {
                type_name: self.sym(id).map(|s| self.name_of(s, 0)).unwrap_or_default(),
                field: field.to_owned(),
            })
    }

    fn source_line_at(&self, process_address: u64, relative_address: u64) -> Result<SourceLocation> {
        match self.db.line_for_address(relative_address) {
            Ok((file, line, row_address)) => Ok(SourceLocation {
                file: file.to_owned(),
                line,
                displacement: relative_address - row_address,
            }),
            // The sentinel: empty file, line 0, the raw input address.
            Err(_) => Ok(SourceLocation {
                file: String::new(),
                line: 0,
                displacement: process_address,
            }),
        }
    }

    fn function_at(&self, _process_address: u64, relative_address: u64) -> Result<(String, u64)> {
        let (sym_id, entry) = self
            .db
            .function_for_address(relative_address)
            .ok_or(Error::FunctionNotFound(relative_address))?;

        let sym = self.sym_by_id(sym_id);
        let name = match sym.linkage_name() {
            Some(mangled) => demangle::demangle(mangled).into_owned(),
            None => sym.name().unwrap_or("<unknown>").to_owned(),
        };

        Ok((name, relative_address - entry))
    }

    fn frame_locals(
        &self,
        frame: &FrameContext<'_>,
        relative_address: u64,
        arguments_only: bool,
    ) -> Result<Vec<FrameLocal>> {
        let Some((func, _)) = self.db.function_for_address(relative_address) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        self.collect_locals(
            self.sym_by_id(func),
            frame,
            relative_address,
            arguments_only,
            &mut out,
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::testenc::{encode_unit, AbbrevEnc, Enc, UNIT_HEADER_LEN};
    use crate::dwarf::{CancelToken, Database, Sections};

    /// Owned section images for one synthetic executable:
    ///
    /// ```c
    /// // a.c
    /// struct Point { int32 x; int32 y; };
    /// typedef int32 *T;   // via unnamed pointer type
    /// typedef T U;
    /// typedef V;          // no target: means void
    /// struct Base { int32 b; };
    /// struct Der : Base { int32 d; };
    /// struct VDer : virtual Base { ... };
    /// int main(int32 argc) { Point pt; int32 lv; { int32 tmp; } }
    /// int32 add(int32, int32);  // mangled _Z3addii
    /// ```
    struct Fixture {
        info: Vec<u8>,
        abbrev: Vec<u8>,
        line: Vec<u8>,
        loc: Vec<u8>,
    }

    impl Fixture {
        fn sections(&self) -> Sections<'_> {
            Sections {
                debug_info: &self.info,
                debug_abbrev: &self.abbrev,
                debug_line: &self.line,
                debug_loc: &self.loc,
                ..Sections::default()
            }
        }
    }

    fn fixture() -> Fixture {
        let mut ab = AbbrevEnc::new();
        ab.entry(
            1,
            DW_TAG_compile_unit,
            true,
            &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_comp_dir, DW_FORM_string),
                (DW_AT_stmt_list, DW_FORM_sec_offset),
                (DW_AT_low_pc, DW_FORM_addr),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        );
        ab.entry(
            2,
            DW_TAG_base_type,
            false,
            &[(DW_AT_name, DW_FORM_string), (DW_AT_byte_size, DW_FORM_data1)],
        );
        ab.entry(
            3,
            DW_TAG_structure_type,
            true,
            &[(DW_AT_name, DW_FORM_string), (DW_AT_byte_size, DW_FORM_data1)],
        );
        ab.entry(
            4,
            DW_TAG_member,
            false,
            &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_type, DW_FORM_ref4),
                (DW_AT_data_member_location, DW_FORM_data1),
            ],
        );
        ab.entry(5, DW_TAG_pointer_type, false, &[(DW_AT_type, DW_FORM_ref4)]);
        ab.entry(
            6,
            DW_TAG_typedef,
            false,
            &[(DW_AT_name, DW_FORM_string), (DW_AT_type, DW_FORM_ref4)],
        );
        ab.entry(7, DW_TAG_typedef, false, &[(DW_AT_name, DW_FORM_string)]);
        ab.entry(
            8,
            DW_TAG_inheritance,
            false,
            &[
                (DW_AT_type, DW_FORM_ref4),
                (DW_AT_data_member_location, DW_FORM_data1),
            ],
        );
        ab.entry(
            9,
            DW_TAG_subprogram,
            true,
            &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_low_pc, DW_FORM_addr),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        );
        ab.entry(
            10,
            DW_TAG_formal_parameter,
            false,
            &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_type, DW_FORM_ref4),
                (DW_AT_location, DW_FORM_exprloc),
            ],
        );
        ab.entry(
            11,
            DW_TAG_variable,
            false,
            &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_type, DW_FORM_ref4),
                (DW_AT_location, DW_FORM_exprloc),
            ],
        );
        ab.entry(
            12,
            DW_TAG_lexical_block,
            true,
            &[(DW_AT_low_pc, DW_FORM_addr), (DW_AT_high_pc, DW_FORM_data4)],
        );
        ab.entry(
            13,
            DW_TAG_inheritance,
            false,
            &[
                (DW_AT_type, DW_FORM_ref4),
                (DW_AT_data_member_location, DW_FORM_data1),
                (DW_AT_virtuality, DW_FORM_data1),
            ],
        );
        ab.entry(
            14,
            DW_TAG_variable,
            false,
            &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_type, DW_FORM_ref4),
                (DW_AT_location, DW_FORM_sec_offset),
            ],
        );
        ab.entry(
            15,
            DW_TAG_subprogram,
            false,
            &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_linkage_name, DW_FORM_string),
                (DW_AT_low_pc, DW_FORM_addr),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        );
        let abbrev = ab.finish();

        let mut b = Enc::new();
        let pos = |b: &Enc| (UNIT_HEADER_LEN + b.len()) as u32;
        let fbreg = |b: &mut Enc, off: i64| {
            let mut e = Enc::new();
            e.u8(0x91).sleb(off); // DW_OP_fbreg
            b.uleb(e.len() as u64).bytes(&e.0);
        };

        b.uleb(1)
            .cstr("a.c")
            .cstr("/src")
            .u32(0)
            .u64(0x100)
            .u32(0x100);

        let int32 = pos(&b);
        b.uleb(2).cstr("int32").u8(4);

        let point = pos(&b);
        b.uleb(3).cstr("Point").u8(8);
        b.uleb(4).cstr("x").u32(int32).u8(0);
        b.uleb(4).cstr("y").u32(int32).u8(4);
        b.uleb(0);

        let pointer = pos(&b);
        b.uleb(5).u32(int32);

        let t = pos(&b);
        b.uleb(6).cstr("T").u32(pointer);
        b.uleb(6).cstr("U").u32(t);
        b.uleb(7).cstr("V");

        let base = pos(&b);
        b.uleb(3).cstr("Base").u8(4);
        b.uleb(4).cstr("b").u32(int32).u8(0);
        b.uleb(0);

        b.uleb(3).cstr("Der").u8(8);
        b.uleb(8).u32(base).u8(0);
        b.uleb(4).cstr("d").u32(int32).u8(4);
        b.uleb(0);

        b.uleb(3).cstr("VDer").u8(16);
        b.uleb(13).u32(base).u8(0).u8(1); // DW_VIRTUALITY_virtual
        b.uleb(0);

        b.uleb(9).cstr("main").u64(0x100).u32(0x40);
        b.uleb(10).cstr("argc").u32(int32);
        fbreg(&mut b, 16);
        b.uleb(11).cstr("pt").u32(point);
        fbreg(&mut b, -24);
        b.uleb(14).cstr("lv").u32(int32).u32(0); // location list at offset 0
        b.uleb(12).u64(0x110).u32(0x10);
        b.uleb(11).cstr("tmp").u32(int32);
        fbreg(&mut b, -32);
        b.uleb(0); // close block
        b.uleb(0); // close main

        b.uleb(15)
            .cstr("add")
            .cstr("_Z3addii")
            .u64(0x140)
            .u32(0x10);

        b.uleb(0); // close root

        Fixture {
            info: encode_unit(4, 8, 0, &b.0),
            abbrev,
            line: encode_line_program(),
            loc: encode_loc_list(),
        }
    }

    /// DWARF 2 line program: 0x100 -> a.c:10, 0x104 -> a.c:11, end 0x108.
    fn encode_line_program() -> Vec<u8> {
        let mut header = Enc::new();
        header.u8(1); // min_inst_length
        header.u8(1); // default_is_stmt
        header.u8(-5i8 as u8); // line_base
        header.u8(14); // line_range
        header.u8(13); // opcode_base
        header.bytes(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
        header.u8(0); // no include dirs
        header.cstr("a.c").uleb(0).uleb(0).uleb(0);
        header.u8(0);

        let mut ops = Enc::new();
        ops.u8(0).uleb(9).u8(2).u64(0x100); // DW_LNE_set_address
        ops.u8(DW_LNS_advance_line).sleb(9);
        ops.u8(DW_LNS_copy);
        ops.u8(DW_LNS_advance_pc).uleb(4);
        ops.u8(DW_LNS_advance_line).sleb(1);
        ops.u8(DW_LNS_copy);
        ops.u8(DW_LNS_advance_pc).uleb(4);
        ops.u8(0).uleb(1).u8(DW_LNE_end_sequence);

        let mut out = Enc::new();
        out.u32((2 + 4 + header.len() + ops.len()) as u32);
        out.u16(2);
        out.u32(header.len() as u32);
        out.bytes(&header.0);
        out.bytes(&ops.0);
        out.0
    }

    /// Location list for `lv`: `fbreg -40` across the whole of `main`.
    ///
    /// Entries are relative to the unit base address (0x100).
    fn encode_loc_list() -> Vec<u8> {
        let mut e = Enc::new();
        e.u64(0x00).u64(0x40);
        e.u16(2).u8(0x91).sleb(-40);
        e.u64(0).u64(0);
        e.0
    }

    fn provider(fx: &Fixture) -> DwarfProvider<'_> {
        let db = Database::parse(fx.sections(), &|a| a, &CancelToken::new());
        assert!(db.diagnostics().is_empty(), "{:?}", db.diagnostics());
        DwarfProvider::new(db)
    }

    #[test]
    fn struct_layout() {
        let fx = fixture();
        let p = provider(&fx);

        let point = p.type_id("Point").unwrap();
        assert_eq!(p.type_tag(point).unwrap(), TagKind::Struct);
        assert_eq!(p.type_size(point).unwrap(), 8);
        assert_eq!(p.field_names(point).unwrap(), ["x", "y"]);

        let (ty, offset) = p.field_type_and_offset(point, "y").unwrap();
        assert_eq!(offset, 4);
        assert_eq!(ty, p.type_id("int32").unwrap());
        assert_eq!(p.type_name(ty).unwrap(), "int32");
        assert_eq!(p.type_tag(ty).unwrap(), TagKind::Base);

        assert!(matches!(
            p.field_type_and_offset(point, "z"),
            Err(Error::FieldNotFound { .. })
        ));
    }

    #[test]
    fn typedef_chain() {
        let fx = fixture();
        let p = provider(&fx);

        let u = p.type_id("U").unwrap();
        assert_eq!(p.type_tag(u).unwrap(), TagKind::Typedef);

        let t = p.element_type(u).unwrap();
        assert_eq!(p.type_name(t).unwrap(), "T");
        assert_eq!(p.type_tag(t).unwrap(), TagKind::Typedef);

        let ptr = p.element_type(t).unwrap();
        assert_eq!(p.type_tag(ptr).unwrap(), TagKind::Pointer);
        assert_eq!(p.type_name(ptr).unwrap(), "int32*");
        assert_eq!(p.type_size(ptr).unwrap(), 8);

        let int32 = p.element_type(ptr).unwrap();
        assert_eq!(p.type_name(int32).unwrap(), "int32");
        assert_eq!(p.type_size(int32).unwrap(), 4);
    }

    #[test]
    fn typedef_without_target_means_void() {
        let fx = fixture();
        let p = provider(&fx);

        let v = p.type_id("V").unwrap();
        let void = p.element_type(v).unwrap();
        assert_eq!(p.type_name(void).unwrap(), "void");
        assert_eq!(p.type_tag(void).unwrap(), TagKind::Base);
        assert_eq!(p.type_size(void).unwrap(), 0);
        assert_eq!(p.type_size(v).unwrap(), 0);
    }

    #[test]
    fn inherited_fields_flatten() {
        let fx = fixture();
        let p = provider(&fx);

        let der = p.type_id("Der").unwrap();
        assert_eq!(p.field_names(der).unwrap(), ["b", "d"]);
        assert_eq!(p.field_type_and_offset(der, "b").unwrap().1, 0);
        assert_eq!(p.field_type_and_offset(der, "d").unwrap().1, 4);
    }

    #[test]
    fn field_offsets_round_trip() {
        let fx = fixture();
        let p = provider(&fx);

        for name in ["Point", "Base", "Der"] {
            let id = p.type_id(name).unwrap();
            for field in p.field_names(id).unwrap() {
                let (ty, offset) = p.field_type_and_offset(id, &field).unwrap();
                // The per-field lookup must agree with bulk enumeration.
                let fields = p.fields_of(id).unwrap();
                let bulk = fields.iter().find(|f| f.name == field).unwrap();
                assert_eq!((ty, offset), (bulk.type_id, bulk.offset));
            }
        }
    }

    #[test]
    fn virtual_inheritance_is_unsupported() {
        let fx = fixture();
        let p = provider(&fx);

        let vder = p.type_id("VDer").unwrap();
        assert!(matches!(
            p.field_names(vder),
            Err(Error::Dwarf(dwarf::Error::UnsupportedExpression))
        ));
    }

    #[test]
    fn unknown_type_name() {
        let fx = fixture();
        let p = provider(&fx);
        assert!(matches!(
            p.type_id("NoSuchType"),
            Err(Error::Dwarf(dwarf::Error::UnknownType(_)))
        ));
    }

    #[test]
    fn bad_type_token() {
        let fx = fixture();
        let p = provider(&fx);
        let bogus = TypeId::from_raw(0xffff);
        assert!(matches!(p.type_tag(bogus), Err(Error::BadTypeId(0xffff))));
        assert_eq!(bogus.raw(), 0xffff);
    }

    #[test]
    fn source_lines() {
        let fx = fixture();
        let p = provider(&fx);

        let loc = p.source_line_at(0x7fff_0102, 0x102).unwrap();
        assert_eq!(
            loc,
            SourceLocation {
                file: "/src/a.c".into(),
                line: 10,
                displacement: 2,
            }
        );

        assert_eq!(p.source_line_at(0x7fff_0106, 0x106).unwrap().line, 11);

        // Past the end of the sequence: the sentinel row.
        let miss = p.source_line_at(0xdead_beef, 0x108).unwrap();
        assert_eq!(
            miss,
            SourceLocation {
                file: String::new(),
                line: 0,
                displacement: 0xdead_beef,
            }
        );
    }

    #[test]
    fn functions() {
        let fx = fixture();
        let p = provider(&fx);

        let (name, disp) = p.function_at(0, 0x120).unwrap();
        assert_eq!(name, "main");
        assert_eq!(disp, 0x20);

        // Mangled linkage names come back demangled.
        let (name, disp) = p.function_at(0, 0x145).unwrap();
        assert_eq!(name, "add(int, int)");
        assert_eq!(disp, 5);

        assert!(matches!(
            p.function_at(0, 0x90),
            Err(Error::FunctionNotFound(0x90))
        ));
    }

    #[test]
    fn frame_locals_inside_block() {
        let fx = fixture();
        let p = provider(&fx);

        let fb = 0x7fff_0000u64;
        let frame = FrameContext {
            frame_base: Some(fb),
            ..Default::default()
        };

        let args = p.frame_locals(&frame, 0x112, true).unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].name, "argc");
        assert_eq!(args[0].location, VarLocation::Memory(fb + 16));
        assert_eq!(p.type_name(args[0].type_id).unwrap(), "int32");

        let all = p.frame_locals(&frame, 0x112, false).unwrap();
        let names: Vec<_> = all.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["argc", "pt", "lv", "tmp"]);
        assert_eq!(all[1].location, VarLocation::Memory(fb - 24));
        assert_eq!(all[2].location, VarLocation::Memory(fb - 40)); // via .debug_loc
        assert_eq!(all[3].location, VarLocation::Memory(fb - 32));
        assert_eq!(p.type_name(all[1].type_id).unwrap(), "Point");
    }

    #[test]
    fn frame_locals_outside_block() {
        let fx = fixture();
        let p = provider(&fx);

        let frame = FrameContext {
            frame_base: Some(0x1000),
            ..Default::default()
        };

        // 0x105 is before the lexical block at [0x110, 0x120): no `tmp`.
        let all = p.frame_locals(&frame, 0x105, false).unwrap();
        let names: Vec<_> = all.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["argc", "pt", "lv"]);
    }

    #[test]
    fn frame_locals_without_frame_base() {
        let fx = fixture();
        let p = provider(&fx);

        // Every location in the fixture is frame-relative, so they all read
        // as absent without a frame base.
        let locals = p
            .frame_locals(&FrameContext::default(), 0x112, false)
            .unwrap();
        assert!(locals.is_empty());

        // No function at the address: empty result, not an error.
        let frame = FrameContext::default();
        assert!(p.frame_locals(&frame, 0x9999, false).unwrap().is_empty());
    }

    #[test]
    fn provider_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DwarfProvider<'static>>();
    }
}
