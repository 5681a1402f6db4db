// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DDF candidate selection (`spec.md` §4.4 "Matching and selection").

use super::model::{Ddf, DdfCategory, DdfOrigin, DdfPolicy, DdfStatus};

/// One DDF that matched a device's (manufacturer, model) pair and passed
/// its `matchexpr`, if any.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub ddf: &'a Ddf,
    pub index: usize,
}

fn origin_priority(origin: DdfOrigin) -> u8 {
    match origin {
        DdfOrigin::User => 1,
        DdfOrigin::System => 0,
    }
}

/// Drop Draft candidates unless Draft is the *only* category present
/// (Open Question #3, resolved in DESIGN.md: Draft only survives when it
/// is the sole candidate, regardless of whether it's a bundle or raw
/// JSON).
fn drop_drafts_unless_sole<'a>(candidates: Vec<Candidate<'a>>) -> Vec<Candidate<'a>> {
    if candidates.iter().all(|c| c.ddf.status == DdfStatus::Draft) {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| c.ddf.status != DdfStatus::Draft)
        .collect()
}

fn pick_newest<'a>(candidates: &[Candidate<'a>]) -> Option<Candidate<'a>> {
    candidates
        .iter()
        .max_by(|a, b| {
            a.ddf
                .last_modified
                .cmp(&b.ddf.last_modified)
                .then_with(|| origin_priority(a.ddf.origin).cmp(&origin_priority(b.ddf.origin)))
        })
        .map(|c| Candidate { ddf: c.ddf, index: c.index })
}

/// Apply `policy` to `candidates`, returning the selected DDF's index into
/// whatever table the caller is scanning, or `None` if nothing matches.
pub fn select<'a>(
    candidates: Vec<Candidate<'a>>,
    policy: DdfPolicy,
    pinned_hash: Option<&[u8; 32]>,
) -> Option<Candidate<'a>> {
    if candidates.is_empty() {
        return None;
    }
    let candidates = drop_drafts_unless_sole(candidates);
    if candidates.is_empty() {
        return None;
    }

    match policy {
        DdfPolicy::RawJson => {
            let raw: Vec<_> = candidates
                .into_iter()
                .filter(|c| c.ddf.category == DdfCategory::RawJson)
                .collect();
            raw.into_iter().max_by(|a, b| {
                origin_priority(a.ddf.origin)
                    .cmp(&origin_priority(b.ddf.origin))
                    .then_with(|| {
                        let a_gold = a.ddf.status == DdfStatus::Gold;
                        let b_gold = b.ddf.status == DdfStatus::Gold;
                        a_gold.cmp(&b_gold)
                    })
            })
        }
        DdfPolicy::LatestPreferStable => {
            let stable: Vec<_> = candidates
                .iter()
                .filter(|c| c.ddf.category == DdfCategory::StableBundle)
                .cloned()
                .collect();
            if !stable.is_empty() {
                return pick_newest(&stable);
            }
            pick_newest(&candidates)
        }
        DdfPolicy::Latest => {
            let bundles: Vec<_> = candidates
                .into_iter()
                .filter(|c| c.ddf.category != DdfCategory::RawJson)
                .collect();
            pick_newest(&bundles)
        }
        DdfPolicy::Pin => {
            let hash = pinned_hash?;
            candidates
                .iter()
                .find(|c| &c.ddf.content_hash == hash)
                .cloned()
                .or_else(|| select(candidates, DdfPolicy::LatestPreferStable, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ddf(
        category: DdfCategory,
        origin: DdfOrigin,
        status: DdfStatus,
        last_modified: i64,
        hash_byte: u8,
    ) -> Ddf {
        let mut content_hash = [0u8; 32];
        content_hash[0] = hash_byte;
        Ddf {
            manufacturer_names: vec![],
            model_ids: vec![],
            product: None,
            status,
            sleeper: false,
            sub_devices: vec![],
            bindings: vec![],
            matchexpr: None,
            content_hash,
            category,
            origin,
            last_modified,
        }
    }

    #[test]
    fn s1_latest_prefer_stable_picks_stable_over_newer_user() {
        let stable = ddf(
            DdfCategory::StableBundle,
            DdfOrigin::System,
            DdfStatus::Gold,
            1_714_521_600, // 2024-05-01
            1,
        );
        let user = ddf(
            DdfCategory::UserBundle,
            DdfOrigin::User,
            DdfStatus::Gold,
            1_730_419_200, // 2024-11-01
            2,
        );
        let candidates = vec![
            Candidate { ddf: &stable, index: 0 },
            Candidate { ddf: &user, index: 1 },
        ];
        let picked = select(candidates, DdfPolicy::LatestPreferStable, None).unwrap();
        assert_eq!(picked.index, 0);
    }

    #[test]
    fn s2_pin_picks_matching_hash_else_falls_back() {
        let a = ddf(DdfCategory::StableBundle, DdfOrigin::System, DdfStatus::Gold, 1, 0xa1);
        let b = ddf(DdfCategory::BetaBundle, DdfOrigin::System, DdfStatus::Gold, 2, 0xb2);
        let c = ddf(DdfCategory::UserBundle, DdfOrigin::User, DdfStatus::Gold, 3, 0xc3);

        let mut want_hash = [0u8; 32];
        want_hash[0] = 0xb2;

        let candidates = vec![
            Candidate { ddf: &a, index: 0 },
            Candidate { ddf: &b, index: 1 },
            Candidate { ddf: &c, index: 2 },
        ];
        let picked = select(candidates, DdfPolicy::Pin, Some(&want_hash)).unwrap();
        assert_eq!(picked.index, 1);

        let mut no_match = [0u8; 32];
        no_match[0] = 0xff;
        let candidates = vec![Candidate { ddf: &a, index: 0 }, Candidate { ddf: &b, index: 1 }];
        let picked = select(candidates, DdfPolicy::Pin, Some(&no_match)).unwrap();
        // Falls back to latest_prefer_stable: "a" is stable.
        assert_eq!(picked.index, 0);
    }

    #[test]
    fn draft_dropped_when_non_draft_present() {
        let draft = ddf(DdfCategory::RawJson, DdfOrigin::User, DdfStatus::Draft, 5, 1);
        let gold = ddf(DdfCategory::RawJson, DdfOrigin::System, DdfStatus::Gold, 1, 2);
        let candidates = vec![
            Candidate { ddf: &draft, index: 0 },
            Candidate { ddf: &gold, index: 1 },
        ];
        let picked = select(candidates, DdfPolicy::RawJson, None).unwrap();
        assert_eq!(picked.index, 1);
    }

    #[test]
    fn sole_draft_candidate_survives() {
        let draft = ddf(DdfCategory::RawJson, DdfOrigin::User, DdfStatus::Draft, 5, 1);
        let candidates = vec![Candidate { ddf: &draft, index: 0 }];
        let picked = select(candidates, DdfPolicy::RawJson, None).unwrap();
        assert_eq!(picked.index, 0);
    }

    #[test]
    fn no_candidates_returns_none() {
        assert!(select(Vec::new(), DdfPolicy::Latest, None).is_none());
    }
}
