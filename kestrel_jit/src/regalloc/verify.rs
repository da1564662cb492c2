//! Interval verification.
//!
//! Checks the allocation result before the LIR is rewritten. Any violation is an
//! internal error in the allocator and fails with `InvalidAllocation`.

use super::assign::is_resolver_temp;
use super::linear_scan::LinearScan;
use crate::lir::Location;
use kestrel_core::{CompileError, CompileResult};
use log::debug;
use rustc_hash::FxHashMap;

impl LinearScan<'_> {
    pub(crate) fn verify_intervals(&self) -> CompileResult<()> {
        let mut by_location: FxHashMap<Location, Vec<u32>> = FxHashMap::default();

        for (number, slot) in self.intervals.slots() {
            let Some(interval) = slot else {
                continue;
            };
            let fail = |what: &str| CompileError::invalid_allocation(format!("interval {interval}: {what}"));

            if interval.operand_number() != number {
                return Err(fail(&format!("stored at operand number {number}")));
            }
            if interval.is_variable() && !interval.kind().is_legal() {
                return Err(fail("no kind assigned"));
            }
            let Some(location) = interval.location() else {
                return Err(fail("no location assigned"));
            };
            if let Location::Register(reg) = location {
                if !self.registers.is_allocatable(reg) {
                    return Err(fail("register is not allocatable"));
                }
            }
            if interval.is_empty() {
                return Err(fail("no range"));
            }
            if interval.ranges().any(|r| r.from >= r.to) {
                return Err(fail("zero length range"));
            }

            // ranges of the move resolver's temporaries carry no meaning
            if !is_resolver_temp(interval.from(), interval.to()) {
                by_location.entry(location).or_default().push(number);
            }
        }

        for (location, ids) in &by_location {
            for (i, &a) in ids.iter().enumerate() {
                for &b in &ids[i + 1..] {
                    if self.intervals[a].intersects(&self.intervals[b]) {
                        return Err(CompileError::invalid_allocation(format!(
                            "intervals {} and {} overlap in {location}",
                            self.intervals[a], self.intervals[b]
                        )));
                    }
                }
            }
        }

        debug!("verified {} locations", by_location.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::linear_scan::Numbering;
    use super::super::liveness::LivenessAnalysis;
    use super::super::{AllocatorConfig, DefaultPriorityPolicy};
    use super::*;
    use crate::backend::registers::{RegisterConfig, reference};
    use crate::lir::{Constant, Kind, LirBuilder, Opcode};

    #[test]
    fn test_overlap_in_one_register_is_rejected() {
        let registers = RegisterConfig::reference();
        let config = AllocatorConfig::for_testing();
        let mut b = LirBuilder::new("overlap", &registers);
        let x = b.variable(Kind::Int);
        let y = b.variable(Kind::Int);
        b.new_block();
        b.mov(Constant::int(1), x);
        b.mov(Constant::int(2), y);
        b.binary(Opcode::Add, y, x, y);
        b.ret(Some(y.into()));
        let mut lir = b.finish();

        let numbering = Numbering::number(&mut lir).unwrap();
        let liveness = LivenessAnalysis::compute(&lir, config.max_liveness_iterations).unwrap();
        let x_number = lir.operands.variable_number(x);
        let y_number = lir.operands.variable_number(y);
        let mut ls = LinearScan::new(&mut lir, &registers, &config, &DefaultPriorityPolicy, numbering, liveness);
        ls.build_intervals().unwrap();

        for number in [x_number, y_number] {
            ls.intervals[number].assign_location(Location::Register(reference::R1));
        }
        let err = ls.verify_intervals().unwrap_err();
        assert!(matches!(err, CompileError::InvalidAllocation { .. }));
        assert!(!err.is_bailout());

        ls.intervals[y_number].assign_location(Location::Register(reference::R2));
        assert!(ls.verify_intervals().is_ok());
    }
}
