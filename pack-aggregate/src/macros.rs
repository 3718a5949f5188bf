//! Macros

/// Invoke `$macro` with the `{Variant, Type}` pairs of all of the counter aggregators
macro_rules! for_all_counter_aggregators {
    ($macro:ident) => {
        $macro! {
            {CountStar32, count::CountStar32},
            {CountStar64, count::CountStar64},
            {Count32, count::Count32},
            {Count64, count::Count64},
            {Sum64, sum::Sum64},
            {SumDouble, sum::SumDouble},
            {Avg64, avg::Avg64},
            {AvgDouble, avg::AvgDouble},
            {Min32, min_max::Min32},
            {Min64, min_max::Min64},
            {MinDouble, min_max::MinDouble},
            {Max32, min_max::Max32},
            {Max64, min_max::Max64},
            {MaxDouble, min_max::MaxDouble},
            {MinText, text::MinText},
            {MaxText, text::MaxText},
            {List32, list::List32},
            {List64, list::List64},
            {ListDouble, list::ListDouble},
            {ListText, list::ListText},
            {Moments, moments::Moments},
            {BitAnd, bitwise::BitAnd},
            {BitOr, bitwise::BitOr},
            {BitXor, bitwise::BitXor},
            {GroupConcat, group_concat::GroupConcat}
        }
    };
}

pub(crate) use for_all_counter_aggregators;
