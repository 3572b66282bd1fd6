//! Serializable diagnostic descriptions of type handles.

use serde::{Deserialize, Serialize};

use graftr_abi::MetadataKind;

use crate::swift_type::SwiftType;
use crate::synth::SynthType;

/// A snapshot of what a type handle looks like at the ABI level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDesc {
    pub name: Option<String>,
    pub mangled: String,
    pub kind: String,
    pub size: usize,
    pub stride: usize,
    pub alignment: usize,
    pub pod: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDesc {
    pub name: String,
    pub type_mangled: String,
    pub offset: usize,
}

fn kind_name(kind: MetadataKind) -> String {
    match kind {
        MetadataKind::STRUCT => "struct".into(),
        MetadataKind::ENUM => "enum".into(),
        MetadataKind::OPTIONAL => "optional".into(),
        MetadataKind::TUPLE => "tuple".into(),
        MetadataKind::OPAQUE => "opaque".into(),
        MetadataKind::FOREIGN_CLASS => "foreign class".into(),
        kind if kind.is_class() => "class".into(),
        kind => format!("kind {:#x}", kind.0),
    }
}

/// Describes any type handle. Field information is only available for
/// synthesized types; see [`describe_synth`].
pub fn describe(ty: &SwiftType) -> TypeDesc {
    TypeDesc {
        name: ty.name(),
        mangled: ty.mangled_name().to_owned(),
        kind: kind_name(ty.kind()),
        size: ty.size(),
        stride: ty.stride(),
        alignment: ty.alignment(),
        pod: ty.is_pod(),
        fields: Vec::new(),
    }
}

/// Describes a synthesized type, fields included.
pub fn describe_synth(ty: &SynthType) -> TypeDesc {
    let mut desc = describe(ty.swift_type());
    desc.fields = ty
        .fields()
        .iter()
        .map(|field| FieldDesc {
            name: field.name().to_owned(),
            type_mangled: field.ty().mangled_name().to_owned(),
            offset: field.offset(),
        })
        .collect();
    desc
}
