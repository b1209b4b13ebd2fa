use std::collections::BTreeMap;

use crate::error::Result;
use crate::expr::Expr;
use crate::plan::Operator;

use super::builder::{offset_plus_limit, Builder, ScanParts};
use super::entry::{IndexEntry, PushDownProperty};
use super::keyspace::{BaseKeyspace, KeyspaceTerm};
use super::minimal::minimal_indexes;

impl Builder<'_> {
    /// Scans the sargable `indexes` of `term`.
    ///
    /// A covering scan is tried first. Otherwise the minimal set of entries
    /// is scanned and intersected; the entry serving ORDER BY becomes the
    /// first scan of an `OrderedIntersectScan`. Returns the scan and the
    /// longest sarg key prefix used, or `None` when a primary-key join
    /// leaves no usable entry.
    pub fn build_secondary_scan(
        &mut self,
        mut indexes: BTreeMap<String, IndexEntry>,
        term: &KeyspaceTerm,
        base: &BaseKeyspace,
        id: &Expr,
    ) -> Result<Option<(Operator, usize)>> {
        if self.cover.is_some() && !term.ansi_nest {
            if let Some(found) = self.build_covering_scan(&mut indexes, term, base, id)? {
                return Ok(Some(found));
            }
        }

        self.reset_projection();
        if self.group_aggs_pushed() {
            self.reset_push_downs();
        }

        let pred = base.dnf_pred.as_ref();
        let mut indexes = minimal_indexes(indexes, true, pred);
        self.sarg_indexes(base, term.under_hash, indexes.values_mut())?;

        let mut order_index: Option<String> = None;
        let mut push_down = false;
        for entry in indexes.values_mut() {
            entry.push_down = self.index_push_down_property(entry, &entry.keys, pred, &term.alias, false);
            if self.order.is_some() && order_index.is_none() && entry.is_push_down(PushDownProperty::ORDER) {
                order_index = Some(entry.name().to_owned());
                self.max_parallelism = 1;
            }
            push_down |= entry.is_push_down(PushDownProperty::LIMIT | PushDownProperty::OFFSET);
        }

        if self.order.is_some() && order_index.is_none() {
            self.reset_order_offset_limit();
        }

        let mut intersect_limit = None;
        if push_down && indexes.len() > 1 {
            intersect_limit = offset_plus_limit(self.offset, self.limit);
            self.reset_offset_limit();
        } else if !push_down {
            self.reset_offset_limit();
        }

        let projection = match indexes.values().next() {
            Some(entry) if indexes.len() == 1 => {
                if self.offset.is_some() && !entry.is_push_down(PushDownProperty::OFFSET) {
                    self.limit = offset_plus_limit(self.offset, self.limit);
                    self.reset_offset();
                }
                self.build_index_projection(Some(entry), None, None, true)
            }
            _ => self.build_index_projection(None, None, None, true),
        };

        let mut ordered: Option<Operator> = None;
        let mut scans = Vec::with_capacity(indexes.len());
        let mut sarg_length = 0;
        for (name, entry) in &indexes {
            if term.primary_join && !primary_join_usable(entry, id) {
                continue;
            }
            let is_order_index = order_index.as_deref() == Some(name.as_str());
            let index_order = if is_order_index {
                self.use_index_order(entry, &entry.keys).unwrap_or_default()
            } else {
                Vec::new()
            };
            let scan = self.create_scan(
                entry,
                term,
                pred,
                ScanParts {
                    projection: Some(projection.clone()),
                    index_order,
                    ..ScanParts::default()
                },
            )?;
            if is_order_index {
                ordered = Some(scan);
            } else {
                scans.push(scan);
            }
            sarg_length = sarg_length.max(entry.sarg_keys().len());
        }

        let plan = match (ordered, scans.len()) {
            (None, 0) => return Ok(None),
            (Some(scan), 0) => {
                self.order_scan = true;
                scan
            }
            (None, 1) => match scans.pop() {
                Some(scan) => scan,
                None => return Ok(None),
            },
            (None, _) => Operator::IntersectScan {
                limit: intersect_limit,
                scans,
            },
            (Some(scan), _) => {
                self.order_scan = true;
                scans.insert(0, scan);
                Operator::OrderedIntersectScan {
                    limit: intersect_limit,
                    scans,
                }
            }
        };
        Ok(Some((plan, sarg_length)))
    }
}

// A primary-key join only gains from an index that constrains the document
// key together with something else.
fn primary_join_usable(entry: &IndexEntry, id: &Expr) -> bool {
    let sarg_keys = entry.sarg_keys();
    sarg_keys.iter().any(|k| k.equivalent_to(id)) && (sarg_keys.len() > 1 || entry.index.condition.is_some())
}
