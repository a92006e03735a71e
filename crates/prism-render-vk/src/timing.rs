// SPDX-License-Identifier: CEPL-1.0
//! Per-slot timestamp pairs bracketing the render pass.

use anyhow::Result;
use ash::vk;

use crate::context::DeviceContext;
use crate::error::{VkError, VkResultExt};
use crate::upload::OneShot;

/// Tick delta to milliseconds. Only the low `valid_bits` of each timestamp
/// are meaningful, so the subtraction wraps within that width.
pub fn decode_timestamp_ms(start: u64, end: u64, period_ns: f32, valid_bits: u32) -> f64 {
    let mask = if valid_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << valid_bits) - 1
    };
    let ticks = (end & mask).wrapping_sub(start & mask) & mask;
    ticks as f64 * period_ns as f64 / 1_000_000.0
}

pub struct TimestampQueries {
    pool: vk::QueryPool,
    period_ns: f32,
    valid_bits: u32,
}

impl TimestampQueries {
    /// `None` when the graphics queue cannot write timestamps.
    pub unsafe fn new(ctx: &DeviceContext, slots: usize) -> Result<Option<Self>> {
        if ctx.timestamp_valid_bits == 0 {
            tracing::warn!("graphics queue has no timestamp support; GPU timing disabled");
            return Ok(None);
        }
        let count = (slots * 2) as u32;
        let info = vk::QueryPoolCreateInfo {
            s_type: vk::StructureType::QUERY_POOL_CREATE_INFO,
            query_type: vk::QueryType::TIMESTAMP,
            query_count: count,
            ..Default::default()
        };
        let pool = ctx.device.create_query_pool(&info, None).check("vkCreateQueryPool")?;
        let queries = Self {
            pool,
            period_ns: ctx.limits.timestamp_period,
            valid_bits: ctx.timestamp_valid_bits,
        };

        // Start from a reset pool so the first reads see "not ready", not garbage.
        let reset = (|| -> Result<()> {
            let shot = OneShot::begin(&ctx.device, ctx.families.graphics)?;
            ctx.device.cmd_reset_query_pool(shot.cmd, pool, 0, count);
            shot.submit_and_wait(ctx.graphics_queue)
        })();
        if let Err(e) = reset {
            ctx.device.destroy_query_pool(pool, None);
            return Err(e);
        }
        Ok(Some(queries))
    }

    /// Reset and start write, recorded before the render pass begins.
    pub unsafe fn record_begin(&self, device: &ash::Device, cmd: vk::CommandBuffer, slot: usize) {
        let first = (slot * 2) as u32;
        device.cmd_reset_query_pool(cmd, self.pool, first, 2);
        device.cmd_write_timestamp(cmd, vk::PipelineStageFlags::TOP_OF_PIPE, self.pool, first);
    }

    pub unsafe fn record_end(&self, device: &ash::Device, cmd: vk::CommandBuffer, slot: usize) {
        device.cmd_write_timestamp(cmd, vk::PipelineStageFlags::BOTTOM_OF_PIPE, self.pool, (slot * 2 + 1) as u32);
    }

    /// Non-blocking read of the slot's pair.
    pub unsafe fn poll(&self, device: &ash::Device, slot: usize) -> Result<Option<f64>> {
        let mut ticks = [0u64; 2];
        match device.get_query_pool_results(
            self.pool,
            (slot * 2) as u32,
            &mut ticks,
            vk::QueryResultFlags::TYPE_64,
        ) {
            Ok(()) => Ok(Some(decode_timestamp_ms(ticks[0], ticks[1], self.period_ns, self.valid_bits))),
            Err(vk::Result::NOT_READY) => Ok(None),
            Err(e) => Err(VkError::call("vkGetQueryPoolResults", e).into()),
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_query_pool(self.pool, None);
        self.pool = vk::QueryPool::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_applies_period() {
        // 2_000_000 ticks at 0.5 ns/tick = 1 ms
        assert_eq!(decode_timestamp_ms(1_000, 2_001_000, 0.5, 64), 1.0);
    }

    #[test]
    fn test_decode_wraps_within_valid_bits() {
        let start = (1u64 << 36) - 10;
        let end = 30;
        assert_eq!(decode_timestamp_ms(start, end, 1.0, 36), 40.0 / 1_000_000.0);
    }
}
