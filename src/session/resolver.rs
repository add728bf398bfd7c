//! Startup stage resolution and the catch-up pipeline.
//!
//! Four ordered stages: collect, enrich, synthesize, activate. On session
//! start [`resolve`] decides, from the durable record and the connection
//! parameters alone, where to enter and which stages still need to run.
//! [`run_pipeline`] then executes the needed stages strictly in order,
//! persisting each output the moment it exists so a crash never loses a
//! finished stage.

use tracing::{error, info, warn};

use super::SessionDeps;
use crate::enrichment::{BirthMoment, ChartDocument};
use crate::events::ActivityEvent;
use crate::profile::{FocusTopic, ProfileDocument};
use crate::session::state::ConnectionParams;
use crate::store::{SavedFields, StoredProfile, UserStore};

// Stage names are part of the activity wire format the voice client
// renders; the values are fixed even where the code names differ.
pub const STAGE_COLLECTING: &str = "collecting";
pub const STAGE_ENRICHING: &str = "enriching";
pub const STAGE_GENERATING_XRAY: &str = "generating_xray";

/// Spoken to the user when the primary chart lookup failed and nothing
/// was cached: the session continues, just without a profile.
pub const NOTICE_PROFILE_UNAVAILABLE: &str = "I wasn't able to prepare your personal \
    profile just now, so we'll talk without it for today.";

/// Where a session enters after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStage {
    /// No usable birth details: gather them in conversation first.
    Collect,
    /// Counseling, with whatever context the pipeline can supply.
    Activate,
}

/// What a new session must run before counseling has full context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub entry: EntryStage,
    /// Fetch the chart: birth details are known but no chart is cached.
    pub run_enrich: bool,
    /// Synthesize the profile: no profile is cached.
    pub run_synthesize: bool,
}

/// Decide the stage plan from cached data and connection parameters.
///
/// Pure and total: defined for every combination of birth, chart, and
/// profile presence crossed with seeded history. Without birth details a
/// chart or profile row is unreachable and ignored; seeded history then
/// steers the session into a profile-less Activate instead of Collect.
pub fn resolve(stored: &StoredProfile, params: &ConnectionParams) -> StagePlan {
    if stored.birth.is_none() {
        let entry = if params.seed_history.is_empty() {
            EntryStage::Collect
        } else {
            EntryStage::Activate
        };
        return StagePlan {
            entry,
            run_enrich: false,
            run_synthesize: false,
        };
    }

    StagePlan {
        entry: EntryStage::Activate,
        run_enrich: stored.chart.is_none(),
        run_synthesize: stored.profile.is_none(),
    }
}

/// What the catch-up pipeline produced.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub chart: Option<ChartDocument>,
    pub profile: Option<ProfileDocument>,
    /// Set when the primary chart lookup failed with nothing cached; the
    /// greeting tells the user and the session runs profile-less.
    pub notice: Option<&'static str>,
}

/// Run the stages a [`StagePlan`] calls for, in order, persisting each
/// output immediately.
///
/// Failures degrade instead of propagating: a failed enrich leaves a
/// notice for the greeting, a failed synthesis keeps the chart that was
/// already persisted, and a failed write is logged and carried on from.
pub async fn run_pipeline(
    deps: &SessionDeps,
    user_id: Option<&str>,
    plan: &StagePlan,
    stored: &StoredProfile,
) -> PipelineOutcome {
    let mut outcome = PipelineOutcome {
        chart: stored.chart.clone(),
        profile: stored.profile.clone(),
        notice: None,
    };

    let Some(birth) = &stored.birth else {
        // Degraded entry: nothing to enrich against.
        deps.activity.publish(ActivityEvent::ready());
        return outcome;
    };

    if plan.run_enrich {
        deps.activity
            .publish(ActivityEvent::stage(STAGE_ENRICHING, "", ""));
        let moment = match BirthMoment::parse(&birth.date_of_birth, &birth.time_of_birth) {
            Ok(moment) => moment,
            Err(e) => {
                // Stored strings were validated at collection time, so
                // this is corrupt data; treat it as an enrich failure.
                error!("stored birth details failed to parse: {e}");
                outcome.notice = Some(NOTICE_PROFILE_UNAVAILABLE);
                deps.activity.publish(ActivityEvent::ready());
                return outcome;
            }
        };
        match deps
            .enrichment
            .chart
            .fetch(
                &moment,
                birth.latitude,
                birth.longitude,
                birth.utc_offset_hours,
            )
            .await
        {
            Some(chart) => {
                persist_fields(
                    &deps.store,
                    user_id,
                    &SavedFields {
                        chart: Some(&chart),
                        ..SavedFields::default()
                    },
                );
                outcome.chart = Some(chart);
            }
            None => {
                warn!("chart lookup failed with no cached chart; continuing without a profile");
                outcome.notice = Some(NOTICE_PROFILE_UNAVAILABLE);
                deps.activity.publish(ActivityEvent::ready());
                return outcome;
            }
        }
    }

    if plan.run_synthesize {
        let Some(chart) = &outcome.chart else {
            deps.activity.publish(ActivityEvent::ready());
            return outcome;
        };
        let topic = FocusTopic::default();
        deps.activity.publish(ActivityEvent::stage(
            STAGE_GENERATING_XRAY,
            "",
            topic.as_str(),
        ));
        match deps.synthesizer.synthesize(chart, topic).await {
            Ok(profile) => {
                persist_fields(
                    &deps.store,
                    user_id,
                    &SavedFields {
                        profile: Some(&profile),
                        ..SavedFields::default()
                    },
                );
                info!("profile synthesized during session catch-up");
                outcome.profile = Some(profile);
            }
            Err(e) => {
                // Chart is already persisted; the session just runs
                // profile-less until the next attempt.
                error!("profile synthesis failed during catch-up: {e}");
            }
        }
    }

    deps.activity.publish(ActivityEvent::ready());
    outcome
}

/// Persist field groups for a known user; anonymous sessions skip the
/// write and a failed write is logged, never surfaced.
pub(crate) fn persist_fields(store: &UserStore, user_id: Option<&str>, fields: &SavedFields<'_>) {
    let Some(user_id) = user_id else {
        tracing::debug!("anonymous session; skipping persistence");
        return;
    };
    if let Err(e) = store.save(user_id, fields) {
        error!("failed to persist user record fields: {e}");
    }
}
