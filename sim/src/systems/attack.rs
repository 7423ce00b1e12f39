//! Melee attack cycle.
//!
//! ## Data Access
//! - Reads: targets
//! - Writes: combat
//!
//! A swing fires once, on the tick the cycle crosses the hit time. The cycle
//! wraps after the attack time and keeps running while a target exists;
//! without one it falls back to idle.

use std::sync::Arc;

use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::{FrameBuffers, FrameContext};
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::systems::commands::{AttackCommand, CommandQueue};

/// Advance one attack cycle by `dt`. Returns true on the tick the hit lands.
///
/// An idle cycle only starts when there is a target.
pub fn advance_attack_cycle(cycle: &mut f32, has_target: bool, dt: f32, attack_time: f32, hit_time: f32) -> bool {
    if *cycle < 0.0 {
        if !has_target {
            return false;
        }
        *cycle = 0.0;
    }

    let previous = *cycle;
    *cycle += dt;
    let fired = previous < hit_time && *cycle >= hit_time;

    if *cycle > attack_time {
        *cycle = if has_target {
            *cycle - attack_time
        } else {
            CombatState::IDLE_CYCLE
        };
    }
    fired
}

pub fn schedule_attack(
    graph: &JobGraph,
    frame: &FrameBuffers,
    ctx: FrameContext,
    config: &Arc<SimConfig>,
    commands: &CommandQueue,
    dependency: &Fence,
) -> Fence {
    let targets = frame.targets.clone();
    let combat = frame.combat.clone();
    let index = Arc::clone(&frame.index);
    let config = Arc::clone(config);
    let commands = commands.clone();

    let desc = JobDesc::new("melee_attack_cycle")
        .reads([targets.id()])
        .writes([combat.id()]);

    graph.schedule_for(desc, frame.unit_count(), dependency, move || {
        let targets = targets.read()?;
        let mut combat = combat.write()?;

        combat
            .par_iter_mut()
            .enumerate()
            .with_min_len(config.small_batch)
            .for_each(|(unit, state)| {
                if index.unit_kinds[unit] == UnitKind::Ranged {
                    return;
                }
                let target = targets[unit];
                let fired = advance_attack_cycle(
                    &mut state.attack_cycle,
                    target.has_target(),
                    ctx.dt,
                    config.attack_time,
                    config.hit_time,
                );
                if fired && target.has_target() {
                    commands.push(AttackCommand {
                        attacker: index.units[unit],
                        target: target.entity,
                        damage: config.melee_damage,
                    });
                }
            });
        Ok(())
    })
}
