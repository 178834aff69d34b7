//! Hardware inventory reported by the HD agent.
//!
//! Every simulated node reports the same dual-socket server; only the host
//! GUID and serial number differ.

use ensim_core::proto::{
    BiosInfo, HwInfo, SystemCpu, SystemDisk, SystemGpu, SystemInfo, SystemNetwork, SystemUsb,
    UpdateHostSystemInfoRequest,
};

const GIB: u64 = 1024 * 1024 * 1024;

pub fn host_system_info(uuid: &str, serial: &str) -> UpdateHostSystemInfoRequest {
    let gpu = |pci_id: &str, name: &str| SystemGpu {
        pci_id: pci_id.into(),
        product: "some product".into(),
        vendor: "Vendor".into(),
        name: name.into(),
    };
    let disk = |name: &str, serial_number: &str| SystemDisk {
        name: name.into(),
        serial_number: serial_number.into(),
        vendor: "Foobar Corp.".into(),
        model: "Model".into(),
        size_bytes: 1024 * GIB,
    };
    let usb = |bus: u32, id_vendor: &str| SystemUsb {
        bus,
        addr: bus,
        class: "HighFooBar".into(),
        id_vendor: id_vendor.into(),
    };
    let nic = |name: &str, mac: &str, pci_id: &str| SystemNetwork {
        name: name.into(),
        mac: mac.into(),
        pci_id: pci_id.into(),
        mtu: 1500,
        sriov_enabled: false,
    };

    UpdateHostSystemInfoRequest {
        host_guid: uuid.to_string(),
        system_info: Some(SystemInfo {
            hw_info: Some(HwInfo {
                serial_num: serial.to_string(),
                cpu: Some(SystemCpu {
                    cores: 36,
                    model: "Intel(R) Xeon(R) Platinum 8360Y CPU @ 2.40GHz".into(),
                    sockets: 2,
                    threads: 144,
                    vendor: "GenuineIntel".into(),
                    arch: "x86_64".into(),
                }),
                memory_bytes: 64 * GIB,
                gpus: vec![gpu("0000:00:1f.6", "gpu0"), gpu("0000:00:1f.7", "gpu1")],
                disks: vec![disk("sda1", "1234W45678A"), disk("sda2", "1434W45678B")],
                usb: vec![usb(1, "Foo1"), usb(2, "Foo2")],
                network: vec![
                    nic("ens1", "90:49:fa:07:6c:fa", "0000:00:1f.1"),
                    nic("ens2", "90:49:fa:07:6c:fb", "0000:00:1f.2"),
                ],
            }),
            bios_info: Some(BiosInfo {
                version: "1.0.18".into(),
                release_date: "09/30/2022".into(),
                vendor: "Vendor.".into(),
            }),
        }),
    }
}
