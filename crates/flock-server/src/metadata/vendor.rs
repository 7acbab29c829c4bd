//! MAC Vendor Lookup
//!
//! Resolves the OUI of a MAC address against a small built-in table of
//! vendors commonly found in homelab and edge fleets.

use super::UNKNOWN;
use macaddr::MacAddr6;

const OUI_TABLE: &[([u8; 3], &str)] = &[
    ([0x00, 0x05, 0x69], "VMware"),
    ([0x00, 0x0c, 0x29], "VMware"),
    ([0x00, 0x50, 0x56], "VMware"),
    ([0x08, 0x00, 0x27], "Oracle VirtualBox"),
    ([0x00, 0x15, 0x5d], "Microsoft Hyper-V"),
    ([0x00, 0x16, 0x3e], "Xen"),
    ([0x00, 0x1c, 0x42], "Parallels"),
    ([0x52, 0x54, 0x00], "QEMU/KVM"),
    ([0xb8, 0x27, 0xeb], "Raspberry Pi"),
    ([0xdc, 0xa6, 0x32], "Raspberry Pi"),
    ([0xe4, 0x5f, 0x01], "Raspberry Pi"),
    ([0xd8, 0x3a, 0xdd], "Raspberry Pi"),
    ([0x28, 0xcd, 0xc1], "Raspberry Pi"),
    ([0x00, 0x25, 0x90], "Super Micro"),
    ([0xac, 0x1f, 0x6b], "Super Micro"),
];

/// Vendor name for `mac`, `locally administered` for random/virtual
/// addresses without a known prefix, otherwise `unknown`.
pub fn lookup_vendor(mac: &MacAddr6) -> String {
    let bytes = mac.as_bytes();
    let oui = [bytes[0], bytes[1], bytes[2]];

    if let Some((_, vendor)) = OUI_TABLE.iter().find(|(prefix, _)| *prefix == oui) {
        return (*vendor).to_string();
    }
    if mac.is_local() {
        return "locally administered".to_string();
    }
    UNKNOWN.to_string()
}
