//! Port header and port private feature layouts

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use super::{AfuIdH, AfuIdL, Dfh, NextAfu, RegisterBlock, Scratchpad};

csr_register! {
    pub struct PortCapability {
        /// CCI-P port number
        port_id / with_port_id: 0, 2;
        mmio_size / with_mmio_size: 8, 16;
        supported_interrupts / with_supported_interrupts: 32, 4;
    }
}

csr_register! {
    pub struct PortControl {
        port_sftreset_control / with_port_sftreset_control: 0, 1;
        port_freeze / with_port_freeze: 1, 1;
        afu_latency_report / with_afu_latency_report: 2, 1;
        /// Set to 1 once no CCI-P requests are outstanding
        ccip_outstanding_request / with_ccip_outstanding_request: 4, 1;
    }
}

csr_register! {
    pub struct PortStatus {
        afu_pwr_state / with_afu_pwr_state: 8, 4;
    }
}

/// AFU power state reported in the port status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum AfuPowerState {
    Normal = 0x0,
    Ap1 = 0x1,
    Ap2 = 0x2,
    Ap6 = 0x6,
}

impl PortStatus {
    /// Decoded power state, `None` for reserved encodings
    pub fn power_state(&self) -> Option<AfuPowerState> {
        AfuPowerState::from_u64(self.afu_pwr_state())
    }
}

/// Port header at `port_offsets[i].port_offset` inside the port's BAR
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortHeader {
    pub dfh: Dfh,
    pub afu_id_l: AfuIdL,
    pub afu_id_h: AfuIdH,
    pub next_afu: NextAfu,
    pub scratchpad: Scratchpad,
    pub capability: PortCapability,
    pub control: PortControl,
    pub status: PortStatus,
}

impl PortHeader {
    pub const DFH: usize = 0x00;
    pub const NEXT_AFU: usize = 0x18;
    pub const SCRATCHPAD: usize = 0x28;
    pub const CAPABILITY: usize = 0x30;
    pub const CONTROL: usize = 0x38;
    pub const STATUS: usize = 0x40;
}

impl RegisterBlock for PortHeader {
    const CSR_COUNT: usize = 9;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            afu_id_l: AfuIdL(csrs[1]),
            afu_id_h: AfuIdH(csrs[2]),
            next_afu: NextAfu(csrs[3]),
            scratchpad: Scratchpad(csrs[5]),
            capability: PortCapability(csrs[6]),
            control: PortControl(csrs[7]),
            status: PortStatus(csrs[8]),
        }
    }
}

csr_register! {
    /// Port error status, shared by the mask, error and first-error CSRs
    pub struct PortErrorBits {
        tx_ch0_overflow / with_tx_ch0_overflow: 0, 1;
        tx_ch0_invalidreq / with_tx_ch0_invalidreq: 1, 1;
        tx_ch0_req_cl_len3 / with_tx_ch0_req_cl_len3: 2, 1;
        tx_ch0_req_cl_len2 / with_tx_ch0_req_cl_len2: 3, 1;
        tx_ch0_req_cl_len4 / with_tx_ch0_req_cl_len4: 4, 1;
        tx_ch1_overflow / with_tx_ch1_overflow: 16, 1;
        tx_ch1_invalidreq / with_tx_ch1_invalidreq: 17, 1;
        tx_ch1_req_cl_len3 / with_tx_ch1_req_cl_len3: 18, 1;
        tx_ch1_req_cl_len2 / with_tx_ch1_req_cl_len2: 19, 1;
        tx_ch1_req_cl_len4 / with_tx_ch1_req_cl_len4: 20, 1;
        tx_ch1_insuff_datapayload / with_tx_ch1_insuff_datapayload: 21, 1;
        tx_ch1_datapayload_overrun / with_tx_ch1_datapayload_overrun: 22, 1;
        tx_ch1_incorr_addr / with_tx_ch1_incorr_addr: 23, 1;
        tx_ch1_sop_detected / with_tx_ch1_sop_detected: 24, 1;
        tx_ch1_atomic_req / with_tx_ch1_atomic_req: 25, 1;
        mmioread_timeout / with_mmioread_timeout: 32, 1;
        tx_ch2_fifo_overflow / with_tx_ch2_fifo_overflow: 33, 1;
        num_pending_req_overflow / with_num_pending_req_overflow: 40, 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortErrorFeature {
    pub dfh: Dfh,
    pub error_mask: PortErrorBits,
    pub error: PortErrorBits,
    pub first_error: PortErrorBits,
    /// Header bits [63:0] of the first malformed request
    pub malformed_req_lsb: u64,
    /// Header bits [127:64] of the first malformed request
    pub malformed_req_msb: u64,
}

impl PortErrorFeature {
    pub const ERROR_MASK: usize = 0x08;
    pub const ERROR: usize = 0x10;
    pub const FIRST_ERROR: usize = 0x18;
    pub const MALFORMED_REQ_LSB: usize = 0x20;
    pub const MALFORMED_REQ_MSB: usize = 0x28;
}

impl RegisterBlock for PortErrorFeature {
    const CSR_COUNT: usize = 6;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            error_mask: PortErrorBits(csrs[1]),
            error: PortErrorBits(csrs[2]),
            first_error: PortErrorBits(csrs[3]),
            malformed_req_lsb: csrs[4],
            malformed_req_msb: csrs[5],
        }
    }
}

csr_register! {
    pub struct UmsgCapability {
        /// Number of UMSGs allocated to this port
        no_umsg_alloc_port / with_no_umsg_alloc_port: 0, 8;
        status_umsg_engine / with_status_umsg_engine: 8, 1;
        umsg_init_status / with_umsg_init_status: 9, 1;
    }
}

csr_register! {
    pub struct UmsgMode {
        /// Per-UMSG hint enable
        umsg_hit / with_umsg_hit: 0, 32;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UmsgFeature {
    pub dfh: Dfh,
    pub capability: UmsgCapability,
    /// Physical byte address of the UMSG segment
    pub base_address: u64,
    pub mode: UmsgMode,
}

impl UmsgFeature {
    pub const CAPABILITY: usize = 0x08;
    pub const BASE_ADDRESS: usize = 0x10;
    pub const MODE: usize = 0x18;
}

impl RegisterBlock for UmsgFeature {
    const CSR_COUNT: usize = 4;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            capability: UmsgCapability(csrs[1]),
            base_address: csrs[2],
            mode: UmsgMode(csrs[3]),
        }
    }
}

csr_register! {
    pub struct PortPrControl {
        pr_start_req / with_pr_start_req: 0, 1;
    }
}

csr_register! {
    pub struct PortPrStatus {
        pr_credit / with_pr_credit: 0, 9;
        pr_access_grant / with_pr_access_grant: 12, 1;
        pr_access / with_pr_access: 13, 1;
        pr_timeout_error / with_pr_timeout_error: 16, 1;
        pr_engine_error / with_pr_engine_error: 17, 1;
        pr_data_ovrferr / with_pr_data_ovrferr: 18, 1;
        pr_mega_fstatus / with_pr_mega_fstatus: 20, 3;
        pr_status / with_pr_status: 24, 4;
    }
}

csr_register! {
    pub struct PortPrPowerBudget {
        pwr_format / with_pwr_format: 0, 48;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortPrFeature {
    pub dfh: Dfh,
    pub control: PortPrControl,
    pub status: PortPrStatus,
    pub data: u64,
    pub power_budget: PortPrPowerBudget,
    pub user_clock_freq: u64,
}

impl PortPrFeature {
    pub const CONTROL: usize = 0x08;
    pub const STATUS: usize = 0x10;
    pub const DATA: usize = 0x18;
    pub const POWER_BUDGET: usize = 0x20;
    pub const USER_CLOCK_FREQ: usize = 0x28;
}

impl RegisterBlock for PortPrFeature {
    const CSR_COUNT: usize = 6;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            control: PortPrControl(csrs[1]),
            status: PortPrStatus(csrs[2]),
            data: csrs[3],
            power_budget: PortPrPowerBudget(csrs[4]),
            user_clock_freq: csrs[5],
        }
    }
}

/// Remote signal tap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalTapFeature {
    pub dfh: Dfh,
    pub stap: u64,
}

impl RegisterBlock for SignalTapFeature {
    const CSR_COUNT: usize = 2;

    fn from_csrs(csrs: &[u64]) -> Self {
        Self {
            dfh: Dfh(csrs[0]),
            stap: csrs[1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_header_decode() {
        let mut csrs = [0u64; PortHeader::CSR_COUNT];
        csrs[3] = 0x1000;
        csrs[6] = PortCapability(0).with_port_id(2).with_mmio_size(0x100).csr();
        csrs[8] = PortStatus(0).with_afu_pwr_state(6).csr();
        let hdr = PortHeader::from_csrs(&csrs);
        assert_eq!(hdr.next_afu.afu_id_offset(), 0x1000);
        assert_eq!(hdr.capability.port_id(), 2);
        assert_eq!(hdr.capability.mmio_size(), 0x100);
        assert_eq!(hdr.status.power_state(), Some(AfuPowerState::Ap6));
    }

    #[test]
    fn test_reserved_power_state() {
        assert_eq!(PortStatus(0x3 << 8).power_state(), None);
        assert_eq!(PortStatus(0).power_state(), Some(AfuPowerState::Normal));
    }

    #[test]
    fn test_port_error_bit_positions() {
        let bits = PortErrorBits(0)
            .with_tx_ch1_overflow(1)
            .with_mmioread_timeout(1)
            .with_num_pending_req_overflow(1);
        assert_eq!(bits.csr(), (1 << 16) | (1 << 32) | (1 << 40));
    }

    #[test]
    fn test_port_pr_status_fields() {
        let status = PortPrStatus(0).with_pr_status(0x9).with_pr_mega_fstatus(0x5);
        assert_eq!(status.csr(), (0x9 << 24) | (0x5 << 20));
    }
}
