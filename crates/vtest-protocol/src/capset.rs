use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Capability set ids known to the host.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapsetId {
    Venus = 4,
}

/// The venus capability payload, as reported by the host.
///
/// Hosts may report a longer or shorter record than this one; see
/// [`VenusCapset::from_wire`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct VenusCapset {
    pub wire_format_version: u32,
    pub vk_xml_version: u32,
    pub vk_ext_command_serialization_spec_version: u32,
    pub vk_mesa_venus_protocol_spec_version: u32,
}

impl VenusCapset {
    /// Size of the record this client understands, in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Build the record from the payload bytes that were kept.
    ///
    /// Bytes past [`Self::SIZE`] are ignored and a short payload leaves the
    /// tail zeroed, so hosts newer and older than this client both work.
    pub fn from_wire(bytes: &[u8]) -> Self {
        let mut capset = Self::zeroed();
        let len = bytes.len().min(Self::SIZE);
        bytemuck::bytes_of_mut(&mut capset)[..len].copy_from_slice(&bytes[..len]);
        Self {
            wire_format_version: u32::from_le(capset.wire_format_version),
            vk_xml_version: u32::from_le(capset.vk_xml_version),
            vk_ext_command_serialization_spec_version: u32::from_le(
                capset.vk_ext_command_serialization_spec_version,
            ),
            vk_mesa_venus_protocol_spec_version: u32::from_le(
                capset.vk_mesa_venus_protocol_spec_version,
            ),
        }
    }

    pub fn to_words(&self) -> [u32; 4] {
        [
            self.wire_format_version,
            self.vk_xml_version,
            self.vk_ext_command_serialization_spec_version,
            self.vk_mesa_venus_protocol_spec_version,
        ]
    }
}

/// The capability set a context is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capset {
    pub id: CapsetId,
    pub version: u32,
    pub data: VenusCapset,
}
