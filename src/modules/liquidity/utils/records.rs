use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::modules::liquidity::consts::{RECORD_TYPE, tags};
use crate::modules::liquidity::schemas::{BarChartEntry, PoolSnapshot, StoredPoolData};
use crate::modules::liquidity::utils::codec::{decode_decimal, decode_tick, encode_decimal, encode_tick};
use crate::runtime::store::{Annotation, Annotations, EntityCreate, EntityKey};

pub fn format_timestamp(ts: OffsetDateTime) -> Result<String> {
    ts.format(&Rfc3339).context("format snapshot timestamp")
}

/// One create request per range of the snapshot. The payload is the range as
/// JSON; queries and reads go through the tags.
pub fn snapshot_entities(snapshot: &PoolSnapshot, btl: u64) -> Result<Vec<EntityCreate>> {
    let iso = format_timestamp(snapshot.timestamp)?;
    let unix = u64::try_from(snapshot.timestamp.unix_timestamp())
        .map_err(|_| anyhow!("snapshot timestamp before the unix epoch"))?;

    let mut out = Vec::with_capacity(snapshot.liquidity_data.len());
    for (i, range) in snapshot.liquidity_data.iter().enumerate() {
        let decimals = [
            (tags::PRICE_LOWER, range.price_lower),
            (tags::PRICE_UPPER, range.price_upper),
            (tags::TOTAL_AMOUNT, range.total_amount),
            (tags::TOKEN0_AMOUNT, range.token0_amount),
            (tags::TOKEN1_AMOUNT, range.token1_amount),
        ];
        let mut strings = vec![
            Annotation::new(tags::TYPE, RECORD_TYPE.to_string()),
            Annotation::new(tags::POOL_ADDRESS, snapshot.pool_address.to_ascii_lowercase()),
            Annotation::new(tags::TIMESTAMP, iso.clone()),
            Annotation::new(tags::TICK_IDX, encode_tick(range.tick_idx)),
        ];
        for (key, value) in decimals {
            let encoded = encode_decimal(value)
                .ok_or_else(|| anyhow!("non-finite {key} at tick {}", range.tick_idx))?;
            strings.push(Annotation::new(key, encoded));
        }
        strings.push(Annotation::new(tags::TOKEN0_SYMBOL, snapshot.summary.token0.symbol.clone()));
        strings.push(Annotation::new(tags::TOKEN1_SYMBOL, snapshot.summary.token1.symbol.clone()));

        out.push(EntityCreate {
            data: serde_json::to_vec(range)?,
            btl,
            annotations: Annotations {
                string_annotations: strings,
                numeric_annotations: vec![
                    Annotation::new(tags::SEQUENCE, i as u64 + 1),
                    Annotation::new(tags::TIMESTAMP_UNIX, unix),
                ],
            },
        });
    }
    Ok(out)
}

fn required<'a>(ann: &'a Annotations, key: &str) -> Result<&'a str> {
    ann.string(key).ok_or_else(|| anyhow!("missing {key} tag"))
}

/// Reads a record back from its tags. The unix tag wins over the ISO one when both exist.
pub fn decode_record(key: EntityKey, ann: &Annotations) -> Result<StoredPoolData> {
    let timestamp = match ann.numeric(tags::TIMESTAMP_UNIX) {
        Some(unix) => {
            let secs = i64::try_from(unix).context("timestampUnix out of range")?;
            OffsetDateTime::from_unix_timestamp(secs).context("timestampUnix out of range")?
        }
        None => OffsetDateTime::parse(required(ann, tags::TIMESTAMP)?, &Rfc3339)
            .context("invalid timestamp tag")?,
    };
    Ok(StoredPoolData {
        entity_key: key,
        pool_address: required(ann, tags::POOL_ADDRESS)?.to_string(),
        timestamp,
        tick_idx: decode_tick(required(ann, tags::TICK_IDX)?)?,
        price_lower: decode_decimal(required(ann, tags::PRICE_LOWER)?)?,
        price_upper: decode_decimal(required(ann, tags::PRICE_UPPER)?)?,
        total_amount: decode_decimal(required(ann, tags::TOTAL_AMOUNT)?)?,
        token0_amount: decode_decimal(required(ann, tags::TOKEN0_AMOUNT)?)?,
        token1_amount: decode_decimal(required(ann, tags::TOKEN1_AMOUNT)?)?,
    })
}

/// Newest first. Within one timestamp, ascending tick.
pub fn sort_newest_first(records: &mut [StoredPoolData]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.tick_idx.cmp(&b.tick_idx)));
}

/// Partitions records by exact timestamp; each bucket is sorted by tick.
pub fn group_by_timestamp(
    records: Vec<StoredPoolData>,
) -> BTreeMap<OffsetDateTime, Vec<StoredPoolData>> {
    let mut buckets: BTreeMap<OffsetDateTime, Vec<StoredPoolData>> = BTreeMap::new();
    for r in records {
        buckets.entry(r.timestamp).or_default().push(r);
    }
    for bucket in buckets.values_mut() {
        bucket.sort_by_key(|r| r.tick_idx);
    }
    buckets
}

pub fn bar_chart(records: &[StoredPoolData]) -> Vec<BarChartEntry> {
    let mut bars: Vec<BarChartEntry> = records.iter().map(BarChartEntry::from).collect();
    bars.sort_by_key(|b| b.tick_idx);
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::liquidity::schemas::{LiquidityRange, PoolSummary, TokenInfo};
    use time::macros::datetime;

    fn snapshot() -> PoolSnapshot {
        PoolSnapshot {
            pool_address: "0xpool".into(),
            timestamp: datetime!(2025-09-06 14:00 UTC),
            summary: PoolSummary {
                address: None,
                token0: TokenInfo { address: "0x0".into(), symbol: "WETH".into(), decimals: None },
                token1: TokenInfo { address: "0x1".into(), symbol: "USDC".into(), decimals: None },
                tick_spacing: 10,
                tick: 0,
                liquidity: None,
            },
            liquidity_data: vec![
                LiquidityRange {
                    tick_idx: -10,
                    price_lower: 0.999000499833375,
                    price_upper: 1.0,
                    liquidity: 3.0,
                    token0_amount: 0.0,
                    token1_amount: 0.0014996250937207,
                    total_amount: 0.0014996250937207,
                },
                LiquidityRange {
                    tick_idx: 0,
                    price_lower: 1.0,
                    price_upper: 1.0010004501200209,
                    liquidity: 3.0,
                    token0_amount: 0.001499250,
                    token1_amount: 0.0,
                    total_amount: 0.001499250,
                },
            ],
        }
    }

    fn stored(ts: OffsetDateTime, tick: i32) -> StoredPoolData {
        StoredPoolData {
            entity_key: EntityKey(format!("{}-{tick}", ts.unix_timestamp())),
            pool_address: "0xpool".into(),
            timestamp: ts,
            tick_idx: tick,
            price_lower: 1.0,
            price_upper: 2.0,
            total_amount: 3.0,
            token0_amount: 1.0,
            token1_amount: 2.0,
        }
    }

    #[test]
    fn entities_carry_every_tag() {
        let snap = snapshot();
        let ents = snapshot_entities(&snap, 500).unwrap();
        assert_eq!(ents.len(), 2);

        let ann = &ents[1].annotations;
        assert_eq!(ents[1].btl, 500);
        assert_eq!(ann.string(tags::TYPE), Some(RECORD_TYPE));
        assert_eq!(ann.string(tags::POOL_ADDRESS), Some("0xpool"));
        assert_eq!(ann.string(tags::TIMESTAMP), Some("2025-09-06T14:00:00Z"));
        assert_eq!(ann.string(tags::TICK_IDX), Some("0"));
        assert_eq!(ann.string(tags::TOKEN0_SYMBOL), Some("WETH"));
        assert_eq!(ann.string(tags::TOKEN1_SYMBOL), Some("USDC"));
        assert_eq!(ann.numeric(tags::SEQUENCE), Some(2));
        assert_eq!(ann.numeric(tags::TIMESTAMP_UNIX), Some(1_757_167_200));

        let payload: LiquidityRange = serde_json::from_slice(&ents[1].data).unwrap();
        assert_eq!(payload, snap.liquidity_data[1]);
    }

    #[test]
    fn pool_address_tag_is_lowercase() {
        let mut snap = snapshot();
        snap.pool_address = "0xd0b53D9277642d899df5c87a3966a349a798F224".into();
        let ents = snapshot_entities(&snap, 1).unwrap();
        assert!(ents.iter().all(|e| {
            e.annotations.string(tags::POOL_ADDRESS) == Some("0xd0b53d9277642d899df5c87a3966a349a798f224")
        }));
    }

    #[test]
    fn written_ranges_read_back_unchanged() {
        let snap = snapshot();
        for (ent, range) in snapshot_entities(&snap, 1).unwrap().iter().zip(&snap.liquidity_data) {
            let rec = decode_record(EntityKey("k".into()), &ent.annotations).unwrap();
            assert_eq!(rec.timestamp, snap.timestamp);
            assert_eq!(rec.tick_idx, range.tick_idx);
            assert_eq!(rec.price_lower, range.price_lower);
            assert_eq!(rec.price_upper, range.price_upper);
            assert_eq!(rec.total_amount, range.total_amount);
            assert_eq!(rec.token0_amount, range.token0_amount);
            assert_eq!(rec.token1_amount, range.token1_amount);
        }
    }

    #[test]
    fn non_finite_ranges_refuse_to_encode() {
        let mut snap = snapshot();
        snap.liquidity_data[0].total_amount = f64::INFINITY;
        assert!(snapshot_entities(&snap, 1).is_err());
    }

    #[test]
    fn decode_reports_missing_tags() {
        let mut ann = snapshot_entities(&snapshot(), 1).unwrap().remove(0).annotations;
        ann.string_annotations.retain(|a| a.key != tags::PRICE_UPPER);
        let err = decode_record(EntityKey("k".into()), &ann).unwrap_err();
        assert!(err.to_string().contains(tags::PRICE_UPPER));
    }

    #[test]
    fn decode_falls_back_to_iso_timestamp() {
        let mut ann = snapshot_entities(&snapshot(), 1).unwrap().remove(0).annotations;
        ann.numeric_annotations.clear();
        let rec = decode_record(EntityKey("k".into()), &ann).unwrap();
        assert_eq!(rec.timestamp, datetime!(2025-09-06 14:00 UTC));
    }

    #[test]
    fn grouping_is_a_partition() {
        let t1 = datetime!(2025-09-06 13:00 UTC);
        let t2 = datetime!(2025-09-06 14:00 UTC);
        let records = vec![stored(t2, 20), stored(t1, 10), stored(t2, -5), stored(t1, 0), stored(t2, 0)];
        let total = records.len();

        let groups = group_by_timestamp(records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.values().map(Vec::len).sum::<usize>(), total);
        for (ts, bucket) in &groups {
            assert!(bucket.iter().all(|r| r.timestamp == *ts));
            assert!(bucket.windows(2).all(|w| w[0].tick_idx <= w[1].tick_idx));
        }
        assert_eq!(groups[&t2].iter().map(|r| r.tick_idx).collect::<Vec<_>>(), vec![-5, 0, 20]);
    }

    #[test]
    fn newest_first_ordering() {
        let t1 = datetime!(2025-09-06 13:00 UTC);
        let t2 = datetime!(2025-09-06 14:00 UTC);
        let mut records = vec![stored(t1, 5), stored(t2, 10), stored(t2, -10)];
        sort_newest_first(&mut records);
        let order: Vec<_> = records.iter().map(|r| (r.timestamp, r.tick_idx)).collect();
        assert_eq!(order, vec![(t2, -10), (t2, 10), (t1, 5)]);
    }

    #[test]
    fn bar_chart_sorted_by_tick() {
        let t = datetime!(2025-09-06 14:00 UTC);
        let bars = bar_chart(&[stored(t, 30), stored(t, -30), stored(t, 0)]);
        assert_eq!(bars.iter().map(|b| b.tick_idx).collect::<Vec<_>>(), vec![-30, 0, 30]);
        assert_eq!(bars[0].total_amount, 3.0);
    }
}
