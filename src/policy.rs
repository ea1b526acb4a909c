//! Cancellation fee/refund policy. Pure function of the amount at stake,
//! the time left before check-in, and the stated reason — no I/O, callable
//! standalone.

use crate::model::{CancellationReason, Money, RefundType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub fee: Money,
    pub refund: Money,
    pub refund_type: RefundType,
}

/// Fee percentage by hours remaining until check-in:
/// more than 24h → 0%, 12–24h → 25%, 6–12h → 50%, under 6h → 75%,
/// past check-in → 100%. Medical emergencies and hotel fault waive the fee
/// entirely regardless of timing.
pub fn evaluate(total: Money, hours_until_check_in: i64, reason: CancellationReason) -> Outcome {
    match reason {
        CancellationReason::MedicalEmergency => {
            return Outcome { fee: 0, refund: total, refund_type: RefundType::FullMedical };
        }
        CancellationReason::HotelFault | CancellationReason::Overbooking => {
            return Outcome { fee: 0, refund: total, refund_type: RefundType::FullHotelFault };
        }
        _ => {}
    }

    let (fee_pct, refund_type) = if hours_until_check_in > 24 {
        (0, RefundType::Full)
    } else if hours_until_check_in > 12 {
        (25, RefundType::Partial75)
    } else if hours_until_check_in > 6 {
        (50, RefundType::Partial50)
    } else if hours_until_check_in >= 0 {
        (75, RefundType::Partial25)
    } else {
        (100, RefundType::NoRefund)
    };

    let fee = total * fee_pct / 100;
    Outcome {
        fee,
        refund: total - fee,
        refund_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn more_than_a_day_out_is_free() {
        let o = evaluate(1000, 30, CancellationReason::GuestRequest);
        assert_eq!(o, Outcome { fee: 0, refund: 1000, refund_type: RefundType::Full });
    }

    #[test]
    fn same_day_is_half() {
        let o = evaluate(1000, 10, CancellationReason::GuestRequest);
        assert_eq!(o, Outcome { fee: 500, refund: 500, refund_type: RefundType::Partial50 });
    }

    #[test]
    fn eighteen_hours_keeps_a_quarter() {
        let o = evaluate(1000, 18, CancellationReason::GuestRequest);
        assert_eq!(o, Outcome { fee: 250, refund: 750, refund_type: RefundType::Partial75 });
    }

    #[test]
    fn last_minute_keeps_three_quarters() {
        let o = evaluate(1000, 2, CancellationReason::GuestRequest);
        assert_eq!(o, Outcome { fee: 750, refund: 250, refund_type: RefundType::Partial25 });
    }

    #[test]
    fn past_check_in_refunds_nothing() {
        let o = evaluate(1000, -5, CancellationReason::NoShow);
        assert_eq!(o, Outcome { fee: 1000, refund: 0, refund_type: RefundType::NoRefund });
    }

    #[test]
    fn medical_emergency_waives_fee_regardless_of_timing() {
        let o = evaluate(1000, 2, CancellationReason::MedicalEmergency);
        assert_eq!(o, Outcome { fee: 0, refund: 1000, refund_type: RefundType::FullMedical });
    }

    #[test]
    fn hotel_fault_waives_fee() {
        let o = evaluate(1000, -48, CancellationReason::HotelFault);
        assert_eq!(o, Outcome { fee: 0, refund: 1000, refund_type: RefundType::FullHotelFault });
    }

    #[test]
    fn boundary_hours() {
        // Exactly 24h is inside the 12–24 bracket, exactly 12h inside 6–12,
        // exactly 6h inside the last-minute bracket.
        assert_eq!(evaluate(1000, 25, CancellationReason::GuestRequest).refund_type, RefundType::Full);
        assert_eq!(evaluate(1000, 24, CancellationReason::GuestRequest).refund_type, RefundType::Partial75);
        assert_eq!(evaluate(1000, 12, CancellationReason::GuestRequest).refund_type, RefundType::Partial50);
        assert_eq!(evaluate(1000, 6, CancellationReason::GuestRequest).refund_type, RefundType::Partial25);
        assert_eq!(evaluate(1000, 0, CancellationReason::GuestRequest).refund_type, RefundType::Partial25);
        assert_eq!(evaluate(1000, -1, CancellationReason::GuestRequest).refund_type, RefundType::NoRefund);
    }

    proptest! {
        /// Fee plus refund always reassembles the amount at stake, and
        /// neither side ever goes negative.
        #[test]
        fn fee_and_refund_partition_total(
            total in 0i64..10_000_000,
            hours in -1000i64..1000,
        ) {
            let o = evaluate(total, hours, CancellationReason::GuestRequest);
            prop_assert_eq!(o.fee + o.refund, total);
            prop_assert!(o.fee >= 0);
            prop_assert!(o.refund >= 0);
        }

        /// Shrinking the window never shrinks the fee.
        #[test]
        fn fee_monotone_in_urgency(total in 0i64..1_000_000, hours in -100i64..100) {
            let closer = evaluate(total, hours - 1, CancellationReason::GuestRequest);
            let farther = evaluate(total, hours, CancellationReason::GuestRequest);
            prop_assert!(closer.fee >= farther.fee);
        }
    }
}
