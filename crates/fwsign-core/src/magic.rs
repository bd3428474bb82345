//! Magic-number registry
//!
//! Every self-describing fragment carries a 32-bit tag at a fixed offset.
//! The table below is the complete set this toolchain understands.

/// 32-bit type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MagicNumber {
    SignatureSingleRootEntry,
    SignatureMultiRootEntry,
    SignaturePublicKeyEntry,
    SignatureBlock0Entry,
    PublicKeySingleRoot,
    PublicKeyMultiRoot,
    Signature,
    SignatureChainSection,
    SignatureDescriptor,
    CodeSignModule,
    EngineeringCert,
    CurveSecp256r1,
    CurveSecp384r1,
    HashSha256,
    HashSha384,
    HashSha512,
}

impl MagicNumber {
    /// Every known tag
    pub const ALL: [MagicNumber; 16] = [
        MagicNumber::SignatureSingleRootEntry,
        MagicNumber::SignatureMultiRootEntry,
        MagicNumber::SignaturePublicKeyEntry,
        MagicNumber::SignatureBlock0Entry,
        MagicNumber::PublicKeySingleRoot,
        MagicNumber::PublicKeyMultiRoot,
        MagicNumber::Signature,
        MagicNumber::SignatureChainSection,
        MagicNumber::SignatureDescriptor,
        MagicNumber::CodeSignModule,
        MagicNumber::EngineeringCert,
        MagicNumber::CurveSecp256r1,
        MagicNumber::CurveSecp384r1,
        MagicNumber::HashSha256,
        MagicNumber::HashSha384,
        MagicNumber::HashSha512,
    ];

    pub const fn value(self) -> u32 {
        match self {
            MagicNumber::SignatureSingleRootEntry => 0x7488_1520,
            MagicNumber::SignatureMultiRootEntry => 0x3522_1D5C,
            MagicNumber::SignaturePublicKeyEntry => 0x9254_0917,
            MagicNumber::SignatureBlock0Entry => 0x1536_4367,
            MagicNumber::PublicKeySingleRoot => 0x4065_6643,
            MagicNumber::PublicKeyMultiRoot => 0x5870_0660,
            MagicNumber::Signature => 0x7488_2034,
            MagicNumber::SignatureChainSection => 0x2A5C_1B79,
            MagicNumber::SignatureDescriptor => 0x6229_4895,
            MagicNumber::CodeSignModule => 0x9756_6593,
            MagicNumber::EngineeringCert => 0x47C6_1E25,
            MagicNumber::CurveSecp256r1 => 0x5489_3583,
            MagicNumber::CurveSecp384r1 => 0x5489_3584,
            MagicNumber::HashSha256 => 0x2D37_4DE1,
            MagicNumber::HashSha384 => 0x4930_3819,
            MagicNumber::HashSha512 => 0x2D5A_7C57,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            MagicNumber::SignatureSingleRootEntry => "SIGNATURE_SINGLE_ROOT_ENTRY",
            MagicNumber::SignatureMultiRootEntry => "SIGNATURE_MULTI_ROOT_ENTRY",
            MagicNumber::SignaturePublicKeyEntry => "SIGNATURE_PUBLIC_KEY_ENTRY",
            MagicNumber::SignatureBlock0Entry => "SIGNATURE_BLOCK0_ENTRY",
            MagicNumber::PublicKeySingleRoot => "PUBLIC_KEY_SINGLE_ROOT",
            MagicNumber::PublicKeyMultiRoot => "PUBLIC_KEY_MULTI_ROOT",
            MagicNumber::Signature => "SIGNATURE",
            MagicNumber::SignatureChainSection => "SIGNATURE_CHAIN_SECTION",
            MagicNumber::SignatureDescriptor => "SIGNATURE_DESCRIPTOR",
            MagicNumber::CodeSignModule => "CODE_SIGN_MODULE",
            MagicNumber::EngineeringCert => "ENGINEERING_CERT",
            MagicNumber::CurveSecp256r1 => "CURVE_SECP256R1",
            MagicNumber::CurveSecp384r1 => "CURVE_SECP384R1",
            MagicNumber::HashSha256 => "HASH_SHA256",
            MagicNumber::HashSha384 => "HASH_SHA384",
            MagicNumber::HashSha512 => "HASH_SHA512",
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.value() == value)
    }
}

impl From<MagicNumber> for u32 {
    fn from(m: MagicNumber) -> u32 {
        m.value()
    }
}

impl std::fmt::Display for MagicNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#010x})", self.name(), self.value())
    }
}

/// Human-readable name for a raw tag
pub fn describe(value: u32) -> String {
    match MagicNumber::from_value(value) {
        Some(m) => m.to_string(),
        None => format!("UNKNOWN ({value:#010x})"),
    }
}
