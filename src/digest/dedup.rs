use crate::digest::model::{ContextUnit, Message, Ts};
use std::collections::{BTreeMap, BTreeSet};

/// Share of the smaller context set that also appears in the larger one.
///
/// NOTE: the denominator is `min(|a|, |b|)`, so a small unit merges into a
/// large one on a modest shared slice. Kept as-is for report compatibility;
/// see DESIGN.md before changing it.
pub fn overlap_ratio(a: &BTreeSet<Ts>, b: &BTreeSet<Ts>) -> Option<f64> {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return None;
    }
    let shared = a.intersection(b).count();
    Some(shared as f64 / smaller as f64)
}

fn absorb(receiver: &mut ContextUnit, donor: ContextUnit) {
    receiver.context_ts_set.extend(donor.context_ts_set);
    receiver.participants.extend(donor.participants);

    let mut by_ts: BTreeMap<Ts, Message> = BTreeMap::new();
    for msg in receiver.context_messages.drain(..).chain(donor.context_messages) {
        by_ts.entry(msg.ts).or_insert(msg);
    }
    receiver.context_messages = by_ts.into_values().collect();
}

/// Merge units whose gathered contexts overlap by at least `threshold`,
/// repeating full passes until one completes without a merge.
///
/// Units are ordered by date first; the earlier unit of a merged pair
/// survives and keeps its cluster, date and channel.
pub fn dedup(units: Vec<ContextUnit>, threshold: f64) -> Vec<ContextUnit> {
    if units.len() <= 1 {
        return units;
    }

    let mut slots: Vec<Option<ContextUnit>> = {
        let mut sorted = units;
        sorted.sort_by(|a, b| a.date.cmp(&b.date));
        sorted.into_iter().map(Some).collect()
    };

    loop {
        let mut merged_any = false;
        for i in 0..slots.len() {
            if slots[i].is_none() {
                continue;
            }
            for j in (i + 1)..slots.len() {
                let should_merge = match (&slots[i], &slots[j]) {
                    (Some(a), Some(b)) => overlap_ratio(&a.context_ts_set, &b.context_ts_set)
                        .is_some_and(|ratio| ratio >= threshold),
                    _ => false,
                };
                if !should_merge {
                    continue;
                }
                if let (Some(donor), Some(receiver)) = (slots[j].take(), slots[i].as_mut()) {
                    absorb(receiver, donor);
                    merged_any = true;
                }
            }
        }
        if !merged_any {
            break;
        }
    }

    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::{dedup, overlap_ratio};
    use crate::digest::model::{Cluster, ContextUnit, Message, RelevantMessage, Ts};
    use std::collections::BTreeSet;

    fn unit(day: i64, secs: &[i64], author: &str) -> ContextUnit {
        let anchor = Message::new(Ts::from_secs(day * 86_400), author, "anchor");
        let cluster = Cluster {
            messages: vec![RelevantMessage {
                message: anchor,
                relevance_reason: String::new(),
            }],
        };
        let context = secs
            .iter()
            .map(|s| Message::new(Ts::from_secs(*s), author, format!("m{s}")))
            .collect();
        ContextUnit::new(cluster, context, "general")
    }

    fn ts_secs(set: &BTreeSet<Ts>) -> Vec<i64> {
        set.iter().map(|t| t.as_micros() / 1_000_000).collect()
    }

    #[test]
    fn contained_unit_merges_into_larger_one() {
        let got = dedup(vec![unit(0, &[1, 2, 3], "ana"), unit(1, &[2, 3], "bo")], 0.5);
        assert_eq!(got.len(), 1);
        assert_eq!(ts_secs(&got[0].context_ts_set), vec![1, 2, 3]);
        assert_eq!(got[0].context_messages.len(), 3);
        let participants: Vec<&str> = got[0].participants.iter().map(String::as_str).collect();
        assert_eq!(participants, vec!["ana", "bo"]);
    }

    #[test]
    fn identical_sets_always_merge() {
        let got = dedup(vec![unit(3, &[5, 6], "a"), unit(3, &[5, 6], "b")], 0.4);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn earlier_date_survives_as_receiver() {
        let got = dedup(vec![unit(9, &[1, 2], "late"), unit(2, &[1, 2], "early")], 0.4);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].date, "1970-01-03");
    }

    #[test]
    fn low_overlap_units_stay_apart() {
        let got = dedup(
            vec![unit(0, &[1, 2, 3, 4, 5], "a"), unit(1, &[5, 6, 7, 8, 9], "b")],
            0.4,
        );
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn growth_from_one_merge_enables_the_next() {
        // c overlaps only the union of a and b by enough to merge.
        let a = unit(0, &[1, 2, 3, 4], "a");
        let b = unit(1, &[3, 4, 5, 6], "b");
        let c = unit(2, &[5, 6, 7], "c");
        let got = dedup(vec![a, b, c], 0.5);
        assert_eq!(got.len(), 1);
        assert_eq!(ts_secs(&got[0].context_ts_set), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            unit(0, &[1, 2, 3], "a"),
            unit(1, &[2, 3, 4], "b"),
            unit(2, &[10, 11], "c"),
            unit(3, &[11, 12, 13, 14], "d"),
            unit(4, &[40], "e"),
        ];
        let once = dedup(input, 0.4);
        let twice = dedup(once.clone(), 0.4);
        assert_eq!(once, twice);
    }

    #[test]
    fn ratio_uses_smaller_set_as_denominator() {
        let a: BTreeSet<Ts> = [1, 2, 3, 4].into_iter().map(Ts::from_secs).collect();
        let b: BTreeSet<Ts> = [4].into_iter().map(Ts::from_secs).collect();
        assert_eq!(overlap_ratio(&a, &b), Some(1.0));
        assert_eq!(overlap_ratio(&a, &BTreeSet::new()), None);
    }
}
