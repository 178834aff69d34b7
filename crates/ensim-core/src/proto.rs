//! Control-plane wire messages.
//!
//! Hand-written prost messages for the four calls the simulated agents make.
//! They mirror the shape of the control-plane services closely enough for the
//! simulator; field numbering is not a compatibility contract.

use std::fmt;

// ── Host manager ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum InstanceState {
    Unspecified = 0,
    Running = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum InstanceStatus {
    Unspecified = 0,
    Running = 1,
    Error = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateInstanceStatusRequest {
    #[prost(string, tag = "1")]
    pub host_guid: String,
    #[prost(enumeration = "InstanceState", tag = "2")]
    pub instance_state: i32,
    #[prost(enumeration = "InstanceStatus", tag = "3")]
    pub instance_status: i32,
    #[prost(string, tag = "4")]
    pub provider_status_detail: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateInstanceStatusResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateHostSystemInfoRequest {
    #[prost(string, tag = "1")]
    pub host_guid: String,
    #[prost(message, optional, tag = "2")]
    pub system_info: Option<SystemInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateHostSystemInfoResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemInfo {
    #[prost(message, optional, tag = "1")]
    pub hw_info: Option<HwInfo>,
    #[prost(message, optional, tag = "2")]
    pub bios_info: Option<BiosInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HwInfo {
    #[prost(string, tag = "1")]
    pub serial_num: String,
    #[prost(message, optional, tag = "2")]
    pub cpu: Option<SystemCpu>,
    #[prost(uint64, tag = "3")]
    pub memory_bytes: u64,
    #[prost(message, repeated, tag = "4")]
    pub gpus: Vec<SystemGpu>,
    #[prost(message, repeated, tag = "5")]
    pub disks: Vec<SystemDisk>,
    #[prost(message, repeated, tag = "6")]
    pub usb: Vec<SystemUsb>,
    #[prost(message, repeated, tag = "7")]
    pub network: Vec<SystemNetwork>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemCpu {
    #[prost(uint32, tag = "1")]
    pub cores: u32,
    #[prost(string, tag = "2")]
    pub model: String,
    #[prost(uint32, tag = "3")]
    pub sockets: u32,
    #[prost(uint32, tag = "4")]
    pub threads: u32,
    #[prost(string, tag = "5")]
    pub vendor: String,
    #[prost(string, tag = "6")]
    pub arch: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemGpu {
    #[prost(string, tag = "1")]
    pub pci_id: String,
    #[prost(string, tag = "2")]
    pub product: String,
    #[prost(string, tag = "3")]
    pub vendor: String,
    #[prost(string, tag = "4")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemDisk {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub serial_number: String,
    #[prost(string, tag = "3")]
    pub vendor: String,
    #[prost(string, tag = "4")]
    pub model: String,
    #[prost(uint64, tag = "5")]
    pub size_bytes: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemUsb {
    #[prost(uint32, tag = "1")]
    pub bus: u32,
    #[prost(uint32, tag = "2")]
    pub addr: u32,
    #[prost(string, tag = "3")]
    pub class: String,
    #[prost(string, tag = "4")]
    pub id_vendor: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemNetwork {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub mac: String,
    #[prost(string, tag = "3")]
    pub pci_id: String,
    #[prost(uint32, tag = "4")]
    pub mtu: u32,
    #[prost(bool, tag = "5")]
    pub sriov_enabled: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BiosInfo {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(string, tag = "2")]
    pub release_date: String,
    #[prost(string, tag = "3")]
    pub vendor: String,
}

// ── Maintenance manager ────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum UpdateStatusType {
    Unspecified = 0,
    UpToDate = 1,
    Started = 2,
    Updated = 3,
    Failed = 4,
}

impl UpdateStatusType {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStatusType::Unspecified => "STATUS_TYPE_UNSPECIFIED",
            UpdateStatusType::UpToDate => "STATUS_TYPE_UP_TO_DATE",
            UpdateStatusType::Started => "STATUS_TYPE_STARTED",
            UpdateStatusType::Updated => "STATUS_TYPE_UPDATED",
            UpdateStatusType::Failed => "STATUS_TYPE_FAILED",
        }
    }
}

impl fmt::Display for UpdateStatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateStatus {
    #[prost(enumeration = "UpdateStatusType", tag = "1")]
    pub status_type: i32,
    #[prost(string, tag = "2")]
    pub status_detail: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlatformUpdateStatusRequest {
    #[prost(string, tag = "1")]
    pub host_guid: String,
    #[prost(message, optional, tag = "2")]
    pub update_status: Option<UpdateStatus>,
}

impl PlatformUpdateStatusRequest {
    pub fn new(host_guid: &str, status: UpdateStatusType) -> Self {
        Self {
            host_guid: host_guid.to_string(),
            update_status: Some(UpdateStatus {
                status_type: status as i32,
                status_detail: String::new(),
            }),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateSource {
    #[prost(string, tag = "1")]
    pub kernel_command: String,
    #[prost(string, tag = "2")]
    pub os_repo_url: String,
    #[prost(string, repeated, tag = "3")]
    pub custom_repos: Vec<String>,
}

/// One maintenance window between two UNIX timestamps.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct SingleSchedule {
    #[prost(uint64, tag = "1")]
    pub start_seconds: u64,
    #[prost(uint64, tag = "2")]
    pub end_seconds: u64,
}

/// A recurring maintenance window described by cron fields.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct RepeatedSchedule {
    #[prost(uint32, tag = "1")]
    pub duration_seconds: u32,
    #[prost(string, tag = "2")]
    pub cron_minutes: String,
    #[prost(string, tag = "3")]
    pub cron_hours: String,
    #[prost(string, tag = "4")]
    pub cron_day_month: String,
    #[prost(string, tag = "5")]
    pub cron_month: String,
    #[prost(string, tag = "6")]
    pub cron_day_week: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateSchedule {
    #[prost(message, optional, tag = "1")]
    pub single_schedule: Option<SingleSchedule>,
    #[prost(message, repeated, tag = "2")]
    pub repeated_schedules: Vec<RepeatedSchedule>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlatformUpdateStatusResponse {
    #[prost(message, optional, tag = "1")]
    pub update_source: Option<UpdateSource>,
    #[prost(message, optional, tag = "2")]
    pub update_schedule: Option<UpdateSchedule>,
    #[prost(string, tag = "3")]
    pub installed_packages: String,
}

// ── Telemetry manager ──────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTelemetryConfigRequest {
    #[prost(string, tag = "1")]
    pub guid: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TelemetryConfigEntry {
    #[prost(string, tag = "1")]
    pub input: String,
    #[prost(string, tag = "2")]
    pub kind: String,
    #[prost(string, tag = "3")]
    pub level: String,
    #[prost(uint32, tag = "4")]
    pub interval_seconds: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTelemetryConfigResponse {
    #[prost(string, tag = "1")]
    pub host_guid: String,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<TelemetryConfigEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn update_status_accessor_decodes_enum() {
        let req = PlatformUpdateStatusRequest::new("host-1", UpdateStatusType::Started);
        let bytes = req.encode_to_vec();
        let decoded = PlatformUpdateStatusRequest::decode(bytes.as_slice()).unwrap();
        let status = decoded.update_status.unwrap();
        assert_eq!(status.status_type(), UpdateStatusType::Started);
        assert_eq!(status.status_type().to_string(), "STATUS_TYPE_STARTED");
    }

    #[test]
    fn unknown_status_falls_back_to_default() {
        let status = UpdateStatus {
            status_type: 99,
            status_detail: String::new(),
        };
        assert_eq!(status.status_type(), UpdateStatusType::Unspecified);
    }
}
