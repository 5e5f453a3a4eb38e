// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! DWARF v2-v4 constants.
//!
//! Only the subset this crate actually decodes is spelled out; unknown codes
//! still round-trip through the newtypes so diagnostics can print them.

// The constants mirror the spelling of the DWARF specification.
#![allow(non_upper_case_globals)]
#![allow(missing_docs)]

use std::fmt;

/// A DIE tag (`DW_TAG_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DwTag(pub u16);

pub const DW_TAG_array_type: DwTag = DwTag(0x01);
pub const DW_TAG_class_type: DwTag = DwTag(0x02);
pub const DW_TAG_enumeration_type: DwTag = DwTag(0x04);
pub const DW_TAG_formal_parameter: DwTag = DwTag(0x05);
pub const DW_TAG_lexical_block: DwTag = DwTag(0x0b);
pub const DW_TAG_member: DwTag = DwTag(0x0d);
pub const DW_TAG_pointer_type: DwTag = DwTag(0x0f);
pub const DW_TAG_reference_type: DwTag = DwTag(0x10);
pub const DW_TAG_compile_unit: DwTag = DwTag(0x11);
pub const DW_TAG_structure_type: DwTag = DwTag(0x13);
pub const DW_TAG_subroutine_type: DwTag = DwTag(0x15);
pub const DW_TAG_typedef: DwTag = DwTag(0x16);
pub const DW_TAG_union_type: DwTag = DwTag(0x17);
pub const DW_TAG_inheritance: DwTag = DwTag(0x1c);
pub const DW_TAG_inlined_subroutine: DwTag = DwTag(0x1d);
pub const DW_TAG_subrange_type: DwTag = DwTag(0x21);
pub const DW_TAG_base_type: DwTag = DwTag(0x24);
pub const DW_TAG_const_type: DwTag = DwTag(0x26);
pub const DW_TAG_enumerator: DwTag = DwTag(0x28);
pub const DW_TAG_subprogram: DwTag = DwTag(0x2e);
pub const DW_TAG_variable: DwTag = DwTag(0x34);
pub const DW_TAG_volatile_type: DwTag = DwTag(0x35);
pub const DW_TAG_restrict_type: DwTag = DwTag(0x37);
pub const DW_TAG_namespace: DwTag = DwTag(0x39);
pub const DW_TAG_unspecified_type: DwTag = DwTag(0x3b);
pub const DW_TAG_rvalue_reference_type: DwTag = DwTag(0x42);

impl fmt::Debug for DwTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            DW_TAG_array_type => "DW_TAG_array_type",
            DW_TAG_class_type => "DW_TAG_class_type",
            DW_TAG_enumeration_type => "DW_TAG_enumeration_type",
            DW_TAG_formal_parameter => "DW_TAG_formal_parameter",
            DW_TAG_lexical_block => "DW_TAG_lexical_block",
            DW_TAG_member => "DW_TAG_member",
            DW_TAG_pointer_type => "DW_TAG_pointer_type",
            DW_TAG_reference_type => "DW_TAG_reference_type",
            DW_TAG_compile_unit => "DW_TAG_compile_unit",
            DW_TAG_structure_type => "DW_TAG_structure_type",
            DW_TAG_subroutine_type => "DW_TAG_subroutine_type",
            DW_TAG_typedef => "DW_TAG_typedef",
            DW_TAG_union_type => "DW_TAG_union_type",
            DW_TAG_inheritance => "DW_TAG_inheritance",
            DW_TAG_inlined_subroutine => "DW_TAG_inlined_subroutine",
            DW_TAG_subrange_type => "DW_TAG_subrange_type",
            DW_TAG_base_type => "DW_TAG_base_type",
            DW_TAG_const_type => "DW_TAG_const_type",
            DW_TAG_enumerator => "DW_TAG_enumerator",
            DW_TAG_subprogram => "DW_TAG_subprogram",
            DW_TAG_variable => "DW_TAG_variable",
            DW_TAG_volatile_type => "DW_TAG_volatile_type",
            DW_TAG_restrict_type => "DW_TAG_restrict_type",
            DW_TAG_namespace => "DW_TAG_namespace",
            DW_TAG_unspecified_type => "DW_TAG_unspecified_type",
            DW_TAG_rvalue_reference_type => "DW_TAG_rvalue_reference_type",
            DwTag(other) => return write!(f, "DW_TAG_<{other:#06x}>"),
        };
        f.write_str(name)
    }
}

/// A DIE attribute (`DW_AT_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DwAt(pub u16);

pub const DW_AT_sibling: DwAt = DwAt(0x01);
pub const DW_AT_location: DwAt = DwAt(0x02);
pub const DW_AT_name: DwAt = DwAt(0x03);
pub const DW_AT_byte_size: DwAt = DwAt(0x0b);
pub const DW_AT_stmt_list: DwAt = DwAt(0x10);
pub const DW_AT_low_pc: DwAt = DwAt(0x11);
pub const DW_AT_high_pc: DwAt = DwAt(0x12);
pub const DW_AT_language: DwAt = DwAt(0x13);
pub const DW_AT_comp_dir: DwAt = DwAt(0x1b);
pub const DW_AT_const_value: DwAt = DwAt(0x1c);
pub const DW_AT_upper_bound: DwAt = DwAt(0x2f);
pub const DW_AT_producer: DwAt = DwAt(0x25);
pub const DW_AT_abstract_origin: DwAt = DwAt(0x31);
pub const DW_AT_count: DwAt = DwAt(0x37);
pub const DW_AT_data_member_location: DwAt = DwAt(0x38);
pub const DW_AT_decl_file: DwAt = DwAt(0x3a);
pub const DW_AT_decl_line: DwAt = DwAt(0x3b);
pub const DW_AT_declaration: DwAt = DwAt(0x3c);
pub const DW_AT_encoding: DwAt = DwAt(0x3e);
pub const DW_AT_external: DwAt = DwAt(0x3f);
pub const DW_AT_frame_base: DwAt = DwAt(0x40);
pub const DW_AT_specification: DwAt = DwAt(0x47);
pub const DW_AT_type: DwAt = DwAt(0x49);
pub const DW_AT_virtuality: DwAt = DwAt(0x4c);
pub const DW_AT_ranges: DwAt = DwAt(0x55);
pub const DW_AT_linkage_name: DwAt = DwAt(0x6e);
pub const DW_AT_MIPS_linkage_name: DwAt = DwAt(0x2007);

impl fmt::Debug for DwAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DW_AT_<{:#06x}>", self.0)
    }
}

/// An attribute form (`DW_FORM_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DwForm(pub u16);

pub const DW_FORM_addr: DwForm = DwForm(0x01);
pub const DW_FORM_block2: DwForm = DwForm(0x03);
pub const DW_FORM_block4: DwForm = DwForm(0x04);
pub const DW_FORM_data2: DwForm = DwForm(0x05);
pub const DW_FORM_data4: DwForm = DwForm(0x06);
pub const DW_FORM_data8: DwForm = DwForm(0x07);
pub const DW_FORM_string: DwForm = DwForm(0x08);
pub const DW_FORM_block: DwForm = DwForm(0x09);
pub const DW_FORM_block1: DwForm = DwForm(0x0a);
pub const DW_FORM_data1: DwForm = DwForm(0x0b);
pub const DW_FORM_flag: DwForm = DwForm(0x0c);
pub const DW_FORM_sdata: DwForm = DwForm(0x0d);
pub const DW_FORM_strp: DwForm = DwForm(0x0e);
pub const DW_FORM_udata: DwForm = DwForm(0x0f);
pub const DW_FORM_ref_addr: DwForm = DwForm(0x10);
pub const DW_FORM_ref1: DwForm = DwForm(0x11);
pub const DW_FORM_ref2: DwForm = DwForm(0x12);
pub const DW_FORM_ref4: DwForm = DwForm(0x13);
pub const DW_FORM_ref8: DwForm = DwForm(0x14);
pub const DW_FORM_ref_udata: DwForm = DwForm(0x15);
pub const DW_FORM_indirect: DwForm = DwForm(0x16);
pub const DW_FORM_sec_offset: DwForm = DwForm(0x17);
pub const DW_FORM_exprloc: DwForm = DwForm(0x18);
pub const DW_FORM_flag_present: DwForm = DwForm(0x19);
pub const DW_FORM_ref_sig8: DwForm = DwForm(0x20);

impl fmt::Debug for DwForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DW_FORM_<{:#06x}>", self.0)
    }
}

// Line-number program standard opcodes.
pub const DW_LNS_copy: u8 = 0x01;
pub const DW_LNS_advance_pc: u8 = 0x02;
pub const DW_LNS_advance_line: u8 = 0x03;
pub const DW_LNS_set_file: u8 = 0x04;
pub const DW_LNS_set_column: u8 = 0x05;
pub const DW_LNS_negate_stmt: u8 = 0x06;
pub const DW_LNS_set_basic_block: u8 = 0x07;
pub const DW_LNS_const_add_pc: u8 = 0x08;
pub const DW_LNS_fixed_advance_pc: u8 = 0x09;
pub const DW_LNS_set_prologue_end: u8 = 0x0a;
pub const DW_LNS_set_epilogue_begin: u8 = 0x0b;
pub const DW_LNS_set_isa: u8 = 0x0c;

// Line-number program extended opcodes.
pub const DW_LNE_end_sequence: u8 = 0x01;
pub const DW_LNE_set_address: u8 = 0x02;
pub const DW_LNE_define_file: u8 = 0x03;
pub const DW_LNE_set_discriminator: u8 = 0x04;

// Expression opcodes.
pub const DW_OP_addr: u8 = 0x03;
pub const DW_OP_deref: u8 = 0x06;
pub const DW_OP_const1u: u8 = 0x08;
pub const DW_OP_const1s: u8 = 0x09;
pub const DW_OP_const2u: u8 = 0x0a;
pub const DW_OP_const2s: u8 = 0x0b;
pub const DW_OP_const4u: u8 = 0x0c;
pub const DW_OP_const4s: u8 = 0x0d;
pub const DW_OP_const8u: u8 = 0x0e;
pub const DW_OP_const8s: u8 = 0x0f;
pub const DW_OP_constu: u8 = 0x10;
pub const DW_OP_consts: u8 = 0x11;
pub const DW_OP_plus_uconst: u8 = 0x23;
pub const DW_OP_reg0: u8 = 0x50;
pub const DW_OP_reg31: u8 = 0x6f;
pub const DW_OP_breg0: u8 = 0x70;
pub const DW_OP_breg31: u8 = 0x8f;
pub const DW_OP_regx: u8 = 0x90;
pub const DW_OP_fbreg: u8 = 0x91;
pub const DW_OP_bregx: u8 = 0x92;
pub const DW_OP_piece: u8 = 0x93;
pub const DW_OP_stack_value: u8 = 0x9f;
