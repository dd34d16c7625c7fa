//! FPGA Management Engine header and private feature layouts

use num_derive::{FromPrimitive, ToPrimitive};

use super::{AfuIdH, AfuIdL, Dfh, NextAfu, RegisterBlock, Scratchpad};

/// Number of `port_offsets[]` entries in the FME header
pub const MAX_PORTS: usize = 4;

csr_register! {
    /// FME fabric capability CSR
    pub struct FabricCapability {
        fabric_verid / with_fabric_verid: 0, 8;
        socket_id / with_socket_id: 8, 1;
        pci0_link_avail / with_pci0_link_avail: 12, 1;
        pci1_link_avail / with_pci1_link_avail: 13, 1;
        /// Coherent (QPI/UPI) link available
        qpi_link_avail / with_qpi_link_avail: 14, 1;
        iommu_support / with_iommu_support: 16, 1;
        address_width_bits / with_address_width_bits: 24, 6;
        /// Cache size in KB
        cache_size / with_cache_size: 32, 12;
        cache_assoc / with_cache_assoc: 44, 4;
        lock_bit / with_lock_bit: 62, 1;
    }
}

csr_register! {
    /// One `port_offsets[]` entry: where a port's registers live
    pub struct PortOffset {
        /// Byte offset of the port header inside its BAR
        port_offset / with_port_offset: 0, 24;
        port_bar / with_port_bar: 32, 3;
        port_arbit_poly / with_port_arbit_poly: 56, 4;
        port_imp / with_port_imp: 60, 1;
    }
}

impl PortOffset {
    pub const fn is_implemented(&self) -> bool {
        self.port_imp() == 1
    }
}

/// FME header at offset 0 of BAR 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FmeHeader {
    pub dfh: Dfh,
    pub afu_id_l: AfuIdL,
    pub afu_id_h: AfuIdH,
    pub next_afu: NextAfu,
    pub scratchpad: Scratchpad,
    pub capability: FabricCapability,
    pub port_offsets: [PortOffset; MAX_PORTS],
}

impl FmeHeader {
    pub const DFH: usize = 0x00;
    pub const AFU_ID_L: usize = 0x08;
    pub const AFU_ID_H: usize = 0x10;
    pub const NEXT_AFU: usize = 0x18;
    pub const SCRATCHPAD: usize = 0x28;
    pub const CAPABILITY: usize = 0x30;
    pub const PORT_OFFSETS: usize = 0x38;

    /// Byte offset of `port_offsets[index]`
    pub const fn port_offset_csr(index: usize) -> usize {
        Self::PORT_OFFSETS + index * super::CSR_SIZE
    }
}

impl RegisterBlock for FmeHeader {
    const CSR_COUNT: usize = 7 + MAX_PORTS;

    fn from_csrs(csrs: &[u64]) -> Self {
        let mut port_offsets = [PortOffset::default(); MAX_PORTS];
        for (slot, csr) in port_offsets.iter_mut().zip(&csrs[7..]) {
            *slot = PortOffset(*csr);
        }
        Self {
            dfh: Dfh(csrs[0]),
            afu_id_l: AfuIdL(csrs[1]),
            afu_id_h: AfuIdH(csrs[2]),
            next_afu: NextAfu(csrs[3]),
            scratchpad: Scratchpad(csrs[5]),
            capability: FabricCapability(csrs[6]),
            port_offsets,
        }
    }
}

// Thermal management, feature 0x1

csr_register! {
    /// Temperature threshold CSR
    pub struct TempThreshold {
        tmp_thshold1 / with_tmp_thshold1: 0, 7;
        tmp_thshold1_enable / with_tmp_thshold1_enable: 7, 1;
        tmp_thshold2 / with_tmp_thshold2: 8, 7;
        tmp_thshold2_enable / with_tmp_thshold2_enable: 15, 1;
        therm_trip_thshold / with_therm_trip_thshold: 24, 7;
        thshold1_status / with_thshold1_status: 32, 1;
        thshold2_status / with_thshold2_status: 33, 1;
        therm_trip_thshold_status / with_therm_trip_thshold_status: 35, 1;
        /// Selects AP1 (1) or AP2 (0) when threshold 1 trips
        thshold_policy / with_thshold_policy: 44, 1;
    }
}

csr_register! {
    /// Temperature sensor read values, format 1
    pub struct TempSensorFmt1 {
        /// FPGA temperature in degrees Celsius
        tmp_reading / with_tmp_reading: 0, 7;
        tmp_reading_seq_num / with_tmp_reading_seq_num: 8, 16;
        tmp_reading_valid / with_tmp_reading_valid: 24, 1;
        dbg_mode / with_dbg_mode: 32, 8;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThermalFeature {
    pub dfh: Dfh,
    pub threshold: TempThreshold,
    pub sensor_fmt1: TempSensorFmt1,
    pub sensor_fmt2: u64,
}

impl ThermalFeature {
    pub const THRESHOLD: usize = 0x08;
    pub const SENSOR_FMT1: usize = 0x10;
    pub const SENSOR_FMT2: usize = 0x18;
}

impl RegisterBlock for ThermalFeature {
    const CSR_COUNT: usize = 4;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            threshold: TempThreshold(csrs[1]),
            sensor_fmt1: TempSensorFmt1(csrs[2]),
            sensor_fmt2: csrs[3],
        }
    }
}

// Power management, feature 0x2

csr_register! {
    pub struct PmThreshold {
        threshold1 / with_threshold1: 0, 7;
        threshold2 / with_threshold2: 8, 7;
        threshold1_sts / with_threshold1_sts: 16, 1;
        threshold2_sts / with_threshold2_sts: 17, 1;
        /// FPGA latency tolerance reporting
        fpga_latency_report / with_fpga_latency_report: 18, 1;
    }
}

csr_register! {
    /// Supply current readings
    pub struct PmReadings {
        clock_buffer_supply_i_valid / with_clock_buffer_supply_i_valid: 0, 1;
        core_supply_i_valid / with_core_supply_i_valid: 1, 1;
        trans_supply_i_valid / with_trans_supply_i_valid: 2, 1;
        fpga_supply_i_valid / with_fpga_supply_i_valid: 3, 1;
        volt_regulator_readmods / with_volt_regulator_readmods: 4, 1;
        clock_buffer_supply_i_value / with_clock_buffer_supply_i_value: 8, 8;
        core_supply_i_value / with_core_supply_i_value: 16, 16;
        trans_supply_i_value / with_trans_supply_i_value: 32, 8;
        fpga_supply_i_value / with_fpga_supply_i_value: 40, 8;
        sequence_number / with_sequence_number: 48, 16;
    }
}

csr_register! {
    /// Maximum supply currents recorded
    pub struct PmMaxReadings {
        hw_set_field / with_hw_set_field: 0, 1;
        max_clock_supply_i_rec / with_max_clock_supply_i_rec: 8, 8;
        max_core_supply_i_rec / with_max_core_supply_i_rec: 16, 16;
        max_trans_supply_i_rec / with_max_trans_supply_i_rec: 32, 8;
        max_fpga_supply_i_rec / with_max_fpga_supply_i_rec: 40, 8;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerFeature {
    pub dfh: Dfh,
    pub threshold: PmThreshold,
    pub readings: PmReadings,
    pub max_readings: PmMaxReadings,
}

impl RegisterBlock for PowerFeature {
    const CSR_COUNT: usize = 4;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            threshold: PmThreshold(csrs[1]),
            readings: PmReadings(csrs[2]),
            max_readings: PmMaxReadings(csrs[3]),
        }
    }
}

// Global performance monitor, feature 0x3

/// Cache event codes selectable in the cache control register
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CacheEvent {
    ReadHit = 0x0,
    WriteHit = 0x1,
    ReadMiss = 0x2,
    WriteMiss = 0x3,
    HoldRequest = 0x5,
    DataWritePortContention = 0x6,
    TagWritePortContention = 0x7,
    TxRequestStall = 0x8,
    RxStall = 0x9,
    Evictions = 0xA,
}

/// Fabric event codes selectable in the fabric control register
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FabricEvent {
    Pcie0Read = 0x0,
    Pcie0Write = 0x1,
    Pcie1Read = 0x2,
    Pcie1Write = 0x3,
    UpiRead = 0x4,
    UpiWrite = 0x5,
}

csr_register! {
    pub struct FpmonCacheCtl {
        reset_counter / with_reset_counter: 0, 1;
        freeze / with_freeze: 8, 1;
        cache_event / with_cache_event: 16, 4;
    }
}

csr_register! {
    /// Cache or fabric event counter with the event code it currently counts
    pub struct FpmonCounter {
        counter / with_counter: 0, 60;
        event_code / with_event_code: 60, 4;
    }
}

csr_register! {
    pub struct FpmonFabricCtl {
        reset_counter / with_reset_counter: 0, 1;
        freeze / with_freeze: 8, 1;
        fabric_evt_code / with_fabric_evt_code: 16, 4;
        port_id / with_port_id: 20, 2;
        port_filter / with_port_filter: 23, 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfFeature {
    pub dfh: Dfh,
    pub cache_ctl: FpmonCacheCtl,
    pub cache_ctr0: FpmonCounter,
    pub cache_ctr1: FpmonCounter,
    pub fabric_ctl: FpmonFabricCtl,
    pub fabric_ctr: FpmonCounter,
    /// AFU interface clock counter
    pub clock: u64,
}

impl PerfFeature {
    pub const CACHE_CTL: usize = 0x08;
    pub const CACHE_CTR0: usize = 0x10;
    pub const CACHE_CTR1: usize = 0x18;
    pub const FABRIC_CTL: usize = 0x20;
    pub const FABRIC_CTR: usize = 0x28;
    pub const CLOCK: usize = 0x30;
}

impl RegisterBlock for PerfFeature {
    const CSR_COUNT: usize = 7;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            cache_ctl: FpmonCacheCtl(csrs[1]),
            cache_ctr0: FpmonCounter(csrs[2]),
            cache_ctr1: FpmonCounter(csrs[3]),
            fabric_ctl: FpmonFabricCtl(csrs[4]),
            fabric_ctr: FpmonCounter(csrs[5]),
            clock: csrs[6],
        }
    }
}

// Global error, feature 0x4

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalErrorFeature {
    pub dfh: Dfh,
    pub error_mask0: u64,
    pub error0: u64,
    pub error_mask1: u64,
    pub error1: u64,
    pub error_mask2: u64,
    pub error2: u64,
    pub first_error: u64,
    pub next_error: u64,
}

impl GlobalErrorFeature {
    pub const ERROR_MASK0: usize = 0x08;
    pub const ERROR0: usize = 0x10;
    pub const ERROR_MASK1: usize = 0x18;
    pub const ERROR1: usize = 0x20;
    pub const ERROR_MASK2: usize = 0x28;
    pub const ERROR2: usize = 0x30;
    pub const FIRST_ERROR: usize = 0x38;
    pub const NEXT_ERROR: usize = 0x40;
}

impl RegisterBlock for GlobalErrorFeature {
    const CSR_COUNT: usize = 9;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            error_mask0: csrs[1],
            error0: csrs[2],
            error_mask1: csrs[3],
            error1: csrs[4],
            error_mask2: csrs[5],
            error2: csrs[6],
            first_error: csrs[7],
            next_error: csrs[8],
        }
    }
}

// Partial reconfiguration, feature 0x5

csr_register! {
    pub struct FmePrControl {
        enable_pr_port_access / with_enable_pr_port_access: 0, 1;
        pr_regionid / with_pr_regionid: 8, 2;
        pr_start_req / with_pr_start_req: 12, 1;
        pr_push_complete / with_pr_push_complete: 13, 1;
    }
}

csr_register! {
    pub struct FmePrStatus {
        pr_credit / with_pr_credit: 0, 9;
        pr_status / with_pr_status: 16, 1;
        pr_controller_status / with_pr_controller_status: 20, 3;
        pr_host_status / with_pr_host_status: 24, 4;
    }
}

csr_register! {
    pub struct FmePrError {
        operation_err / with_operation_err: 0, 1;
        crc_err / with_crc_err: 1, 1;
        bitstream_err / with_bitstream_err: 2, 1;
        ip_err / with_ip_err: 3, 1;
        fifo_err / with_fifo_err: 4, 1;
        timeout_err / with_timeout_err: 5, 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FmePrFeature {
    pub dfh: Dfh,
    pub control: FmePrControl,
    pub status: FmePrStatus,
    /// Raw bitstream data word, bits [31:0]
    pub data: u64,
    pub error: FmePrError,
}

impl FmePrFeature {
    pub const CONTROL: usize = 0x08;
    pub const STATUS: usize = 0x10;
    pub const DATA: usize = 0x18;
    pub const ERROR: usize = 0x20;
}

impl RegisterBlock for FmePrFeature {
    const CSR_COUNT: usize = 5;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            control: FmePrControl(csrs[1]),
            status: FmePrStatus(csrs[2]),
            data: csrs[3],
            error: FmePrError(csrs[4]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_offset_fields() {
        let po = PortOffset(0)
            .with_port_offset(0x60000)
            .with_port_bar(2)
            .with_port_arbit_poly(1)
            .with_port_imp(1);
        assert_eq!(po.csr(), 0x1100_0002_0006_0000);
        assert!(po.is_implemented());
        assert!(!PortOffset(po.csr() & !(1 << 60)).is_implemented());
    }

    #[test]
    fn test_fme_header_decode() {
        let mut csrs = [0u64; FmeHeader::CSR_COUNT];
        csrs[0] = 0x1000_0000_1000_0000;
        csrs[5] = 0x1234_5678;
        csrs[7] = PortOffset(0).with_port_imp(1).with_port_offset(0x8000).csr();
        let hdr = FmeHeader::from_csrs(&csrs);
        assert_eq!(hdr.dfh.next_offset(), 0x1000);
        assert_eq!(hdr.scratchpad.scratch_pad(), 0x1234_5678);
        assert!(hdr.port_offsets[0].is_implemented());
        assert!(!hdr.port_offsets[1].is_implemented());
        assert_eq!(FmeHeader::port_offset_csr(3), 0x50);
    }

    #[test]
    fn test_thermal_threshold_bits() {
        let th = TempThreshold(0)
            .with_thshold1_status(1)
            .with_thshold2_status(1)
            .with_thshold_policy(1);
        assert_eq!(th.csr(), (1 << 32) | (1 << 33) | (1 << 44));
    }

    #[test]
    fn test_counter_event_code() {
        let ctr = FpmonCounter(0).with_counter(42).with_event_code(CacheEvent::Evictions as u64);
        assert_eq!(ctr.csr() >> 60, 0xA);
        assert_eq!(ctr.counter(), 42);
    }
}
