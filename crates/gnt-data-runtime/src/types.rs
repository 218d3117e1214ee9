use core::fmt;
use std::str::FromStr;

use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A unique, content-addressed id of an asset.
///
/// The id is a 128-bit value assigned on the first successful import of a
/// `(source path, subasset name)` pair and persisted in the source's meta
/// file. It survives renames and reimports; it is never regenerated for the
/// same pair unless the meta file is deleted or corrupted.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Creates a new random id.
    ///
    /// Uniqueness is guaranteed with overwhelming probability by 122 bits of
    /// cryptographically sourced randomness.
    pub fn create_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the id as raw bytes, as stored in archive files.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Recreates an id from raw bytes read from an archive file.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // canonical form: lowercase, hyphenated
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Type of an asset.
///
/// The enumeration is closed: the `u32` wire value of each variant is part of
/// the archive format and must never be reassigned. `Undefined` is never the
/// type of a successfully imported asset and has no text name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u32)]
pub enum AssetType {
    /// Placeholder for an unrecognized type. Not a valid import target.
    Undefined = 0,
    /// 2d texture.
    Texture = 1,
    /// Shader program.
    Shader = 2,
    /// Material definition.
    Material = 3,
    /// Audio clip.
    AudioClip = 4,
    /// 3d mesh.
    Mesh3d = 5,
    /// Skeletal rig.
    Rig = 6,
    /// Animation clip.
    Animation = 7,
    /// Script source or bytecode.
    Script = 8,
    /// Scene fragment.
    Scene = 9,
}

const NAME_TABLE: &[(AssetType, &str)] = &[
    (AssetType::Texture, "texture"),
    (AssetType::Shader, "shader"),
    (AssetType::Material, "material"),
    (AssetType::AudioClip, "audio_clip"),
    (AssetType::Mesh3d, "mesh3d"),
    (AssetType::Rig, "rig"),
    (AssetType::Animation, "animation"),
    (AssetType::Script, "script"),
    (AssetType::Scene, "scene"),
];

impl AssetType {
    /// Returns the stable text name of the type, `None` for `Undefined`.
    pub fn name(&self) -> Option<&'static str> {
        NAME_TABLE
            .iter()
            .find(|(kind, _)| kind == self)
            .map(|(_, name)| *name)
    }

    /// Inverse of [`Self::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        NAME_TABLE
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(kind, _)| *kind)
    }

    /// Returns the wire value used as the section discriminator in archives.
    pub fn to_raw(self) -> u32 {
        self as u32
    }

    /// Inverse of [`Self::to_raw`].
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Undefined),
            1 => Some(Self::Texture),
            2 => Some(Self::Shader),
            3 => Some(Self::Material),
            4 => Some(Self::AudioClip),
            5 => Some(Self::Mesh3d),
            6 => Some(Self::Rig),
            7 => Some(Self::Animation),
            8 => Some(Self::Script),
            9 => Some(Self::Scene),
            _ => None,
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("undefined"))
    }
}

impl Serialize for AssetType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.name() {
            Some(name) => serializer.serialize_str(name),
            None => Err(ser::Error::custom("'Undefined' has no stable text name")),
        }
    }
}

impl<'de> Deserialize<'de> for AssetType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::from_name(&name)
            .ok_or_else(|| de::Error::custom(format!("unknown asset type '{}'", name)))
    }
}
