//! Turns per-step contact records into enter and leave transitions.

use std::collections::BTreeMap;

use glam::Vec3;
use meshi_physx_protocol::report::CollisionRecord;
use meshi_physx_protocol::Identity;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchChange {
    /// `normal` points from `body` toward `other`.
    Entered {
        body: Identity,
        other: Identity,
        normal: Vec3,
    },
    Left {
        body: Identity,
        other: Identity,
    },
}

/// Touch sets of every body, updated once per collision report.
#[derive(Debug, Default)]
pub struct TouchTracker {
    touching: BTreeMap<Identity, Vec<Identity>>,
    /// This step's neighbours of each body, with a signed record reference:
    /// `+(i + 1)` when the body was `body_a` of record `i`, `-(i + 1)` when
    /// it was `body_b`.
    adjacency: BTreeMap<Identity, Vec<(Identity, i64)>>,
}

impl TouchTracker {
    pub fn touching(&self, body: Identity) -> &[Identity] {
        self.touching.get(&body).map_or(&[], Vec::as_slice)
    }

    /// Drop `body` from every touch set without reporting anything.
    pub fn forget(&mut self, body: Identity) {
        self.touching.remove(&body);
        for others in self.touching.values_mut() {
            others.retain(|o| *o != body);
        }
    }

    /// Diff this step's contacts against the previous touch sets.
    /// Records naming a body `is_live` rejects are ignored.
    pub fn update(
        &mut self,
        records: &[CollisionRecord],
        is_live: impl Fn(Identity) -> bool,
    ) -> Vec<TouchChange> {
        self.adjacency.clear();
        for (i, record) in records.iter().enumerate() {
            let Some((a, b)) = record.bodies() else {
                continue;
            };
            if a == b || !is_live(a) || !is_live(b) {
                continue;
            }
            let r = i as i64 + 1;
            let of_a = self.adjacency.entry(a).or_default();
            if !of_a.iter().any(|(o, _)| *o == b) {
                of_a.push((b, r));
            }
            let of_b = self.adjacency.entry(b).or_default();
            if !of_b.iter().any(|(o, _)| *o == a) {
                of_b.push((a, -r));
            }
        }

        let mut changes = Vec::new();
        for (body, others) in self.touching.iter_mut() {
            match self.adjacency.get(body) {
                None => {
                    changes.extend(others.drain(..).map(|other| TouchChange::Left {
                        body: *body,
                        other,
                    }));
                }
                Some(now) => others.retain(|other| {
                    let still = now.iter().any(|(o, _)| o == other);
                    if !still {
                        changes.push(TouchChange::Left {
                            body: *body,
                            other: *other,
                        });
                    }
                    still
                }),
            }
        }
        self.touching.retain(|_, others| !others.is_empty());

        for (body, now) in &self.adjacency {
            let set = self.touching.entry(*body).or_default();
            for &(other, r) in now {
                if set.contains(&other) {
                    continue;
                }
                set.push(other);
                let record = &records[(r.unsigned_abs() - 1) as usize];
                let normal = Vec3::from_array(record.normal);
                changes.push(TouchChange::Entered {
                    body: *body,
                    other,
                    normal: if r > 0 { normal } else { -normal },
                });
            }
        }
        changes
    }
}
