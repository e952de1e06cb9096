// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The priority and desired-discard calculator.
//!
//! Runs once per entity per priority pass, on the main thread. Desired
//! discard converts accumulated screen-pixel demand into a ladder level via
//! the base-4 logarithm, then folds in the global discard bias and a
//! hysteresis band that damps frame-to-frame noise. Decode priority composes
//! additive score bands whose ordering (boost above delta-discard above
//! pixel-area) is a contract, not a tuning accident: the boost term is added
//! outside the partial-data multiplier so tiering dominance survives it.

use crate::config::{PriorityBands, StreamingConfig};
use crate::entity::TextureEntity;
use orama_core::texture::discard;

/// Do-not-fetch sentinel: the asset is confirmed missing.
pub const PRIORITY_ASSET_MISSING: f32 = -1.0;
/// Do-not-fetch sentinel: loaded data already satisfies the desired level.
pub const PRIORITY_ALREADY_SATISFIED: f32 = -2.0;
/// Do-not-fetch sentinel: the desired level is coarser than the image can
/// supply; stale state from before dimensions were known.
pub const PRIORITY_DISCARD_INVERTED: f32 = -3.0;

/// Whether a computed priority means the entity wants a fetch.
pub fn is_fetchable(priority: f32) -> bool {
    priority > 0.0
}

/// Recomputes `entity.desired_discard` from this frame's virtual size, the
/// global bias, and the camera-motion penalty.
pub fn update_desired_discard(
    entity: &mut TextureEntity,
    config: &StreamingConfig,
    bias: f32,
    motion_penalty: u8,
) {
    if entity.kind().fixed_full_resolution() || entity.boost().never_discards() {
        entity.stable_virtual_size = entity.virtual_size;
        entity.desired_discard = 0;
        return;
    }

    let floor = entity.min_desired_discard;
    let max = entity.max_discard();

    let Some((width, height)) = entity.dimensions() else {
        // Dimensions unknown: probe at the coarsest level the floor allows;
        // the first decode teaches us the real ladder.
        entity.desired_discard = max.min(floor);
        return;
    };

    // Hysteresis: when the demand moved less than the configured fraction,
    // keep computing from the old baseline so the level cannot flicker.
    // The bias still flows through below; only the virtual size is damped.
    let observed = entity.virtual_size;
    let baseline = entity.stable_virtual_size;
    let effective = if entity.kind().uses_hysteresis()
        && baseline > 0.0
        && observed > 0.0
        && ((observed - baseline).abs() / baseline) < config.hysteresis_fraction
    {
        baseline
    } else {
        entity.stable_virtual_size = observed;
        observed
    };

    let raw_level = discard::discard_for_virtual_size(width, height, effective);
    let biased = (raw_level + bias + motion_penalty as f32).clamp(0.0, max as f32);
    entity.desired_discard = (biased.floor() as u8).min(floor);
}

/// Computes the decode priority used to order the global fetch queue.
///
/// Negative values are do-not-fetch sentinels; see the constants above.
pub fn compute_decode_priority(entity: &TextureEntity, bands: &PriorityBands) -> f32 {
    if entity.is_missing() {
        return PRIORITY_ASSET_MISSING;
    }

    let max = entity.max_discard();
    let desired = entity.desired_discard;
    if desired > max {
        return PRIORITY_DISCARD_INVERTED;
    }
    if entity.satisfies(desired) {
        return PRIORITY_ALREADY_SATISFIED;
    }

    let have = entity
        .current_discard
        .unwrap_or_else(|| max.saturating_add(1));
    let delta = have
        .saturating_sub(desired)
        .min(bands.delta_discard_cap) as f32;

    let pixel = entity.virtual_size.min(bands.pixel_area_max);
    let additional = entity.additional_priority.min(bands.additional_max);
    let mut secondary = pixel + delta * bands.delta_discard_step + additional;

    // Something is already on screen for this texture, so sharpening it is
    // less urgent than first-fill for a texture with nothing at all.
    if entity.current_discard.is_some() || entity.low_res.is_some() {
        secondary *= bands.partial_data_multiplier;
    }

    entity.boost().tier() as f32 * bands.boost_tier_step + secondary
}

/// Convenience wrapper storing the result on the entity.
pub fn update_decode_priority(entity: &mut TextureEntity, bands: &PriorityBands) {
    entity.decode_priority = compute_decode_priority(entity, bands);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use orama_core::texture::{BoostLevel, RawImage, TextureId, TextureKind};
    use std::time::Instant;

    fn entity(kind: TextureKind) -> TextureEntity {
        TextureEntity::new(TextureId::new(), kind, true, Instant::now())
    }

    fn with_decode(kind: TextureKind, width: u32, height: u32, achieved: u8) -> TextureEntity {
        let mut e = entity(kind);
        let (w, h) = (width >> achieved, height >> achieved);
        e.apply_decoded(
            RawImage::new(w, h, 1, vec![0; (w * h) as usize]).unwrap(),
            achieved,
        );
        e
    }

    #[test]
    fn missing_asset_is_a_sentinel() {
        let mut e = entity(TextureKind::Fetched);
        e.missing = true;
        assert_eq!(
            compute_decode_priority(&e, &PriorityBands::default()),
            PRIORITY_ASSET_MISSING
        );
        assert!(!is_fetchable(PRIORITY_ASSET_MISSING));
    }

    #[test]
    fn satisfied_entity_is_a_sentinel() {
        let mut e = with_decode(TextureKind::Fetched, 512, 512, 1);
        e.desired_discard = 2;
        assert_eq!(
            compute_decode_priority(&e, &PriorityBands::default()),
            PRIORITY_ALREADY_SATISFIED
        );
    }

    #[test]
    fn inverted_desired_is_a_sentinel() {
        // A 16x16 image supports only one discard level; a stale desired of
        // five is coarser than the image can supply.
        let mut e = with_decode(TextureKind::Fetched, 16, 16, 0);
        e.current_discard = None;
        e.desired_discard = 5;
        assert_eq!(
            compute_decode_priority(&e, &PriorityBands::default()),
            PRIORITY_DISCARD_INVERTED
        );
    }

    #[test]
    fn boost_tier_dominates_worst_case_secondary_terms() {
        let bands = PriorityBands::default();

        // Z: no boost, everything else maxed out.
        let mut z = entity(TextureKind::Fetched);
        z.desired_discard = 0;
        z.virtual_size = 1.0e9;
        z.additional_priority = 1.0e9;

        // Y: one tier up, nothing else going for it, and dampened by an
        // existing low-res buffer.
        let mut y = with_decode(TextureKind::Fetched, 512, 512, 3);
        y.save_low_res(64);
        y.desired_discard = 0;
        y.set_boost(BoostLevel::Terrain);
        y.virtual_size = 0.0;

        let p_z = compute_decode_priority(&z, &bands);
        let p_y = compute_decode_priority(&y, &bands);
        assert!(
            p_y > p_z,
            "tier dominance violated: boosted {p_y} vs unboosted {p_z}"
        );
    }

    #[test]
    fn ui_boost_beats_huge_unboosted_texture() {
        let bands = PriorityBands::default();

        let mut ui = entity(TextureKind::Fetched);
        ui.set_boost(BoostLevel::Ui);
        ui.desired_discard = 0;
        ui.virtual_size = 0.01;

        let mut huge = entity(TextureKind::Fetched);
        huge.desired_discard = 0;
        huge.virtual_size = 4.0e6;

        assert!(compute_decode_priority(&ui, &bands) > compute_decode_priority(&huge, &bands));
    }

    #[test]
    fn delta_discard_outranks_pixel_area() {
        let bands = PriorityBands::default();

        // Far from its desired level, hardly visible.
        let mut far = entity(TextureKind::Fetched);
        far.desired_discard = 0;
        far.virtual_size = 1.0;

        // One level from done, maximum visibility, but dampened for already
        // holding data.
        let mut near = with_decode(TextureKind::Fetched, 1024, 1024, 1);
        near.desired_discard = 0;
        near.virtual_size = 1.0e9;

        assert!(compute_decode_priority(&far, &bands) > compute_decode_priority(&near, &bands));
    }

    #[test]
    fn delta_term_saturates_at_the_cap() {
        let bands = PriorityBands::default();
        let mut e = entity(TextureKind::Fetched);
        e.desired_discard = 0;
        e.virtual_size = 0.0;

        // No data at all: delta would be max_discard + 1 = 6, capped at 4.
        let p = compute_decode_priority(&e, &bands);
        assert_relative_eq!(p, bands.delta_discard_cap as f32 * bands.delta_discard_step);
    }

    #[test]
    fn partial_data_dampens_secondary_but_not_boost() {
        let bands = PriorityBands::default();

        let mut fresh = entity(TextureKind::Fetched);
        fresh.set_boost(BoostLevel::Selected);
        fresh.desired_discard = 0;
        fresh.virtual_size = 500.0;
        let p_fresh = compute_decode_priority(&fresh, &bands);

        let mut partial = with_decode(TextureKind::Fetched, 512, 512, 4);
        partial.set_boost(BoostLevel::Selected);
        partial.desired_discard = 0;
        partial.virtual_size = 500.0;
        let p_partial = compute_decode_priority(&partial, &bands);

        let boost_term = BoostLevel::Selected.tier() as f32 * bands.boost_tier_step;
        assert!(p_partial < p_fresh);
        assert!(p_partial > boost_term, "boost term must survive dampening");
    }

    #[test]
    fn desired_discard_tracks_virtual_size() {
        let config = StreamingConfig::default();
        let mut e = with_decode(TextureKind::Fetched, 1024, 1024, 0);

        // Full demand wants full resolution.
        e.virtual_size = 1024.0 * 1024.0;
        update_desired_discard(&mut e, &config, 0.0, 0);
        assert_eq!(e.desired_discard(), 0);

        // A sixteenth of the area is two ladder levels down.
        e.virtual_size = (1024.0 * 1024.0) / 16.0;
        update_desired_discard(&mut e, &config, 0.0, 0);
        assert_eq!(e.desired_discard(), 2);
    }

    #[test]
    fn bias_degrades_uniformly_and_reclamps() {
        let config = StreamingConfig::default();
        let mut e = with_decode(TextureKind::Fetched, 1024, 1024, 0);
        e.virtual_size = 1024.0 * 1024.0;

        update_desired_discard(&mut e, &config, 3.0, 0);
        assert_eq!(e.desired_discard(), 3);

        // Bias past the ladder end clamps to the image's maximum.
        update_desired_discard(&mut e, &config, 100.0, 0);
        assert_eq!(e.desired_discard(), e.max_discard());
    }

    #[test]
    fn hysteresis_holds_the_level_through_small_jitter() {
        let config = StreamingConfig::default();
        let mut e = with_decode(TextureKind::Fetched, 1024, 1024, 0);

        e.virtual_size = 65_536.0;
        update_desired_discard(&mut e, &config, 0.0, 0);
        let settled = e.desired_discard();

        // Ten percent jitter stays inside the band.
        e.virtual_size = 65_536.0 * 1.1;
        update_desired_discard(&mut e, &config, 0.0, 0);
        assert_eq!(e.desired_discard(), settled);
        assert_relative_eq!(e.stable_virtual_size, 65_536.0);

        // A 4x jump moves the baseline and the level.
        e.virtual_size = 65_536.0 * 4.0;
        update_desired_discard(&mut e, &config, 0.0, 0);
        assert_eq!(e.desired_discard(), settled - 1);
    }

    #[test]
    fn lod_adaptive_kind_skips_hysteresis() {
        let config = StreamingConfig::default();
        let mut e = with_decode(TextureKind::LodAdaptive, 1024, 1024, 0);

        e.virtual_size = 65_536.0;
        update_desired_discard(&mut e, &config, 0.0, 0);
        e.virtual_size = 65_536.0 * 1.1;
        update_desired_discard(&mut e, &config, 0.0, 0);
        assert_relative_eq!(e.stable_virtual_size, 65_536.0 * 1.1);
    }

    #[test]
    fn callback_floor_caps_the_computed_level() {
        let config = StreamingConfig::default();
        let mut e = with_decode(TextureKind::Fetched, 1024, 1024, 0);
        e.register_callback(1, false, Box::new(|_| {}));

        e.virtual_size = 16.0;
        update_desired_discard(&mut e, &config, 0.0, 0);
        assert_eq!(e.desired_discard(), 1);
    }

    #[test]
    fn never_discard_tiers_pin_to_full_resolution() {
        let config = StreamingConfig::default();
        let mut e = with_decode(TextureKind::Fetched, 1024, 1024, 0);
        e.set_boost(BoostLevel::Ui);
        e.virtual_size = 0.0;
        update_desired_discard(&mut e, &config, 8.0, 3);
        assert_eq!(e.desired_discard(), 0);

        let mut media = with_decode(TextureKind::MediaStream, 512, 512, 0);
        media.virtual_size = 0.0;
        update_desired_discard(&mut media, &config, 8.0, 3);
        assert_eq!(media.desired_discard(), 0);
    }

    #[test]
    fn unknown_dimensions_probe_coarse_first() {
        let config = StreamingConfig::default();
        let mut e = entity(TextureKind::Fetched);
        update_desired_discard(&mut e, &config, 0.0, 0);
        assert_eq!(e.desired_discard(), discard::MAX_DISCARD_LEVEL);

        // Unless a callback floor demands better.
        e.register_callback(0, false, Box::new(|_| {}));
        update_desired_discard(&mut e, &config, 0.0, 0);
        assert_eq!(e.desired_discard(), 0);
    }
}
