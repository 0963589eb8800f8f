use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cache_cell::{AvailabilityCache, SessionState};
use matcher_cell::{match_entities, Candidate, EntityKind, MatchType};
use pms_client::{PmsClient, PmsError};
use practitioner_cell::services::practitioners::{
    resolve_practitioner, PractitionerResolveError,
};
use shared_database::{catalog, CoreContext};
use shared_models::clinic::{Clinic, Service};
use shared_models::ids::{BusinessId, SessionId};
use shared_utils::time::{get_clinic_timezone, parse_pms_time, utc_to_local};

use crate::models::{ScanOutcome, SearchCriteria, SlotOffer};
use crate::services::criteria::{group_into_spans, prune_dates_by_schedule, SlotFilter};
use crate::services::fanout::{run_with_deadline, BranchOutcome};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("practitioner not found: {0}")]
    PractitionerNotFound(String),

    #[error("practitioner needs clarification")]
    PractitionerClarification(Vec<String>),

    #[error("practitioner does not work at the requested location")]
    PractitionerLocationMismatch,

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("location not found")]
    InvalidBusiness,

    #[error(transparent)]
    Pms(#[from] PmsError),

    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

/// Answers the three availability questions: all slots on a date, earliest
/// slot within a window, and which practitioners have any slot on a date.
/// Cache-first with PMS fallback; every path shares one slot filter.
pub struct AvailabilityEngine {
    ctx: CoreContext,
}

impl AvailabilityEngine {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub fn clinic_tz(&self, clinic: &Clinic) -> Tz {
        get_clinic_timezone(clinic, &self.ctx.config.default_timezone)
    }

    pub fn today(&self, clinic: &Clinic) -> NaiveDate {
        utc_to_local(self.ctx.now(), self.clinic_tz(clinic)).date_naive()
    }

    fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.ctx.config.request_deadline_secs)
    }

    // === Criteria construction (shared by all paths) ===

    /// Criteria for a practitioner-scoped query. The service is resolved
    /// against the practitioner's own offerings; without a named service the
    /// practitioner's first offering is used.
    pub async fn criteria_for_practitioner(
        &self,
        clinic: &Clinic,
        practitioner_query: &str,
        service_query: Option<&str>,
        business_id: Option<&BusinessId>,
    ) -> Result<Vec<SearchCriteria>, EngineError> {
        let practitioner = resolve_practitioner(&self.ctx, clinic, practitioner_query)
            .await
            .map_err(|e| match e {
                PractitionerResolveError::NotFound(q) => EngineError::PractitionerNotFound(q),
                PractitionerResolveError::ClarificationNeeded(options) => {
                    EngineError::PractitionerClarification(options)
                }
                PractitionerResolveError::Lookup(e) => EngineError::Store(e),
            })?;

        let services =
            catalog::get_practitioner_services(&self.ctx.store, &practitioner.practitioner_id)
                .await?;
        let service = self.pick_service(&services, service_query)?;

        let assigned =
            catalog::get_practitioner_businesses(&self.ctx.store, &practitioner.practitioner_id)
                .await?;
        let businesses: Vec<BusinessId> = match business_id {
            Some(requested) => {
                if assigned.contains(requested) {
                    vec![requested.clone()]
                } else {
                    return Err(EngineError::PractitionerLocationMismatch);
                }
            }
            None => assigned,
        };

        let locations = catalog::get_locations(&self.ctx.store, clinic.clinic_id).await?;
        let name_of = |id: &BusinessId| {
            locations
                .iter()
                .find(|b| &b.business_id == id)
                .map(|b| b.business_name.clone())
                .unwrap_or_default()
        };

        Ok(businesses
            .into_iter()
            .map(|business| SearchCriteria {
                practitioner_id: practitioner.practitioner_id.clone(),
                practitioner_name: practitioner.full_name(),
                business_name: name_of(&business),
                business_id: business,
                service_id: service.service_id.clone(),
                service_name: service.name.clone(),
                duration_minutes: service.duration_minutes,
            })
            .collect())
    }

    /// Criteria for a service-first query: every practitioner offering the
    /// service, at every location they work at (or one location when scoped).
    pub async fn criteria_for_service(
        &self,
        clinic: &Clinic,
        service_query: &str,
        business_id: Option<&BusinessId>,
    ) -> Result<Vec<SearchCriteria>, EngineError> {
        let practitioners = catalog::get_practitioners(&self.ctx.store, clinic.clinic_id).await?;
        let locations = catalog::get_locations(&self.ctx.store, clinic.clinic_id).await?;
        let name_of = |id: &BusinessId| {
            locations
                .iter()
                .find(|b| &b.business_id == id)
                .map(|b| b.business_name.clone())
                .unwrap_or_default()
        };

        let mut criteria = Vec::new();
        for practitioner in &practitioners {
            let services =
                catalog::get_practitioner_services(&self.ctx.store, &practitioner.practitioner_id)
                    .await?;
            let Ok(service) = self.pick_service(&services, Some(service_query)) else {
                continue;
            };

            let assigned = catalog::get_practitioner_businesses(
                &self.ctx.store,
                &practitioner.practitioner_id,
            )
            .await?;
            for business in assigned {
                if let Some(requested) = business_id {
                    if requested != &business {
                        continue;
                    }
                }
                criteria.push(SearchCriteria {
                    practitioner_id: practitioner.practitioner_id.clone(),
                    practitioner_name: practitioner.full_name(),
                    business_name: name_of(&business),
                    business_id: business,
                    service_id: service.service_id.clone(),
                    service_name: service.name.clone(),
                    duration_minutes: service.duration_minutes,
                });
            }
        }

        if criteria.is_empty() {
            return Err(EngineError::ServiceNotFound(service_query.to_string()));
        }
        Ok(criteria)
    }

    /// Criteria for every practitioner at one location, using each
    /// practitioner's first offering.
    pub async fn criteria_for_business(
        &self,
        clinic: &Clinic,
        business_id: &BusinessId,
    ) -> Result<Vec<SearchCriteria>, EngineError> {
        let business = catalog::get_business(&self.ctx.store, clinic.clinic_id, business_id)
            .await?
            .ok_or(EngineError::InvalidBusiness)?;
        let practitioners =
            catalog::get_business_practitioners(&self.ctx.store, business_id).await?;

        let mut criteria = Vec::new();
        for practitioner in &practitioners {
            let services =
                catalog::get_practitioner_services(&self.ctx.store, &practitioner.practitioner_id)
                    .await?;
            let Ok(service) = self.pick_service(&services, None) else {
                continue;
            };
            criteria.push(SearchCriteria {
                practitioner_id: practitioner.practitioner_id.clone(),
                practitioner_name: practitioner.full_name(),
                business_id: business_id.clone(),
                business_name: business.business_name.clone(),
                service_id: service.service_id.clone(),
                service_name: service.name.clone(),
                duration_minutes: service.duration_minutes,
            });
        }
        Ok(criteria)
    }

    fn pick_service<'a>(
        &self,
        services: &'a [Service],
        query: Option<&str>,
    ) -> Result<&'a Service, EngineError> {
        match query {
            None => services
                .first()
                .ok_or_else(|| EngineError::ServiceNotFound("any".to_string())),
            Some(name) => {
                let candidates: Vec<Candidate> = services
                    .iter()
                    .enumerate()
                    .map(|(index, service)| Candidate {
                        id: service.service_id.to_string(),
                        name: service.name.clone(),
                        aliases: Vec::new(),
                        is_primary: false,
                        ordinal: index + 1,
                    })
                    .collect();
                let outcome = match_entities(EntityKind::Service, name, &candidates);
                match outcome.match_type {
                    MatchType::HighConfidence | MatchType::MediumConfidence => {
                        let top = outcome.top().expect("match implies a candidate");
                        services
                            .iter()
                            .find(|s| s.service_id.as_str() == top.candidate.id)
                            .ok_or_else(|| EngineError::ServiceNotFound(name.to_string()))
                    }
                    _ => Err(EngineError::ServiceNotFound(name.to_string())),
                }
            }
        }
    }

    // === Suppression ===

    async fn build_filter(
        &self,
        clinic: &Clinic,
        session_id: &SessionId,
        criteria: &[SearchCriteria],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> SlotFilter {
        let sessions = SessionState::new(self.ctx.store.clone(), self.ctx.clock.clone());

        let mut suppressed: HashSet<String> = if session_id.as_str().is_empty() {
            HashSet::new()
        } else {
            sessions.rejected_slots(session_id).await
        };

        for c in criteria {
            let failed = sessions
                .failed_attempts_range(&c.practitioner_id, &c.business_id, date_from, date_to)
                .await;
            suppressed.extend(failed);
        }

        SlotFilter::new(self.ctx.now(), self.clinic_tz(clinic), suppressed)
    }

    /// Offered slots are optimistically added to the session's rejected set;
    /// a successful booking clears them, and a criteria change naturally maps
    /// to different keys. This is what makes "the caller said no" stick.
    pub async fn record_offers(
        &self,
        clinic: &Clinic,
        session_id: &SessionId,
        criteria: &[SearchCriteria],
        offers: &[SlotOffer],
    ) {
        if session_id.as_str().is_empty() || offers.is_empty() {
            return;
        }
        let tz = self.clinic_tz(clinic);
        let filter = SlotFilter::new(self.ctx.now(), tz, HashSet::new());
        let keys: Vec<String> = offers
            .iter()
            .filter_map(|offer| {
                criteria
                    .get(offer.criteria_index)
                    .map(|c| filter.key_for(c, offer.starts_at))
            })
            .collect();
        let sessions = SessionState::new(self.ctx.store.clone(), self.ctx.clock.clone());
        sessions.reject_slots(session_id, &keys).await;
    }

    // === Question A: all slots on one date ===

    pub async fn slots_for_date(
        &self,
        clinic: &Clinic,
        criteria: &SearchCriteria,
        date: NaiveDate,
        session_id: &SessionId,
    ) -> Result<ScanOutcome, EngineError> {
        let schedules =
            catalog::get_practitioner_schedules(&self.ctx.store, &criteria.practitioner_id)
                .await?;
        let working = prune_dates_by_schedule(&schedules, criteria, &[date]);
        if working.is_empty() {
            debug!(
                "{} does not work at {} on {}, skipping PMS",
                criteria.practitioner_name, criteria.business_name, date
            );
            return Ok(ScanOutcome::default());
        }

        let cache = AvailabilityCache::new(self.ctx.store.clone(), self.ctx.clock.clone());
        let slots = match cache
            .get(&criteria.practitioner_id, &criteria.business_id, date)
            .await
        {
            Some(cached) => {
                info!("availability cache hit for {} on {}", criteria.practitioner_id, date);
                cached
            }
            None => {
                let pms = self.ctx.pms_for(clinic).await;
                let fetched = fetch_span(&pms, criteria, date, date, self.clinic_tz(clinic)).await?;
                let starts: Vec<DateTime<Utc>> =
                    fetched.iter().flat_map(|(_, slots)| slots.clone()).collect();
                cache
                    .set(
                        clinic.clinic_id,
                        &criteria.practitioner_id,
                        &criteria.business_id,
                        date,
                        starts.clone(),
                    )
                    .await;
                starts
            }
        };

        let criteria_slice = std::slice::from_ref(criteria);
        let filter = self
            .build_filter(clinic, session_id, criteria_slice, date, date)
            .await;

        let mut outcome = ScanOutcome::default();
        for starts_at in slots {
            if filter.admits(criteria, starts_at) {
                outcome.slots.push(SlotOffer {
                    criteria_index: 0,
                    starts_at,
                    date,
                });
            } else {
                outcome.filtered_out += 1;
            }
        }
        outcome.slots.sort_by_key(|offer| offer.starts_at);

        if outcome.slots.is_empty() && outcome.filtered_out > 0 {
            info!(
                "all {} slots for {} on {} were suppressed (rejected/failed), reporting no availability",
                outcome.filtered_out, criteria.practitioner_name, date
            );
        }
        Ok(outcome)
    }

    // === Question B: earliest slot within a window ===

    pub async fn find_next(
        &self,
        clinic: &Clinic,
        criteria_list: &[SearchCriteria],
        max_days: u32,
        session_id: &SessionId,
    ) -> Result<ScanOutcome, EngineError> {
        let max_days = max_days.min(30);
        if max_days == 0 || criteria_list.is_empty() {
            return Ok(ScanOutcome::default());
        }

        let today = self.today(clinic);
        let window: Vec<NaiveDate> = (0..max_days as i64)
            .map(|offset| today + chrono::Duration::days(offset))
            .collect();
        let window_end = *window.last().expect("window is non-empty");

        let cache = Arc::new(AvailabilityCache::new(
            self.ctx.store.clone(),
            self.ctx.clock.clone(),
        ));
        let pms = Arc::new(self.ctx.pms_for(clinic).await);
        let tz = self.clinic_tz(clinic);

        // Schedule-prune each criteria, pull what the cache already covers,
        // and queue one branch per uncovered span.
        let mut schedule_memo: HashMap<String, Vec<shared_models::clinic::PractitionerSchedule>> =
            HashMap::new();
        let mut immediate: Vec<SlotOffer> = Vec::new();
        let mut branches: Vec<BoxFuture<'static, Result<SpanResult, String>>> = Vec::new();

        for (index, criteria) in criteria_list.iter().enumerate() {
            let schedules = match schedule_memo.get(criteria.practitioner_id.as_str()) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = catalog::get_practitioner_schedules(
                        &self.ctx.store,
                        &criteria.practitioner_id,
                    )
                    .await?;
                    schedule_memo
                        .insert(criteria.practitioner_id.to_string(), fetched.clone());
                    fetched
                }
            };

            let working = prune_dates_by_schedule(&schedules, criteria, &window);
            if working.is_empty() {
                continue;
            }

            let covered = cache
                .get_range(
                    &criteria.practitioner_id,
                    &criteria.business_id,
                    today,
                    window_end,
                )
                .await;

            let mut uncovered = Vec::new();
            for date in &working {
                match covered.get(date) {
                    Some(slots) => {
                        immediate.extend(slots.iter().map(|starts_at| SlotOffer {
                            criteria_index: index,
                            starts_at: *starts_at,
                            date: *date,
                        }));
                    }
                    None => uncovered.push(*date),
                }
            }

            let spans = group_into_spans(&uncovered);
            if spans.is_empty() {
                continue;
            }

            // One branch per criteria: spans are walked in date order and the
            // walk stops at the first span that yields a slot, so a hit on
            // day 6 costs exactly one upstream call.
            let pms = Arc::clone(&pms);
            let cache = Arc::clone(&cache);
            let criteria = criteria.clone();
            let clinic_id = clinic.clinic_id;
            branches.push(
                async move {
                    let mut collected: Vec<(NaiveDate, Vec<DateTime<Utc>>)> = Vec::new();
                    for (span_from, span_to) in spans {
                        let per_day = fetch_span(&pms, &criteria, span_from, span_to, tz)
                            .await
                            .map_err(|e| e.to_string())?;
                        for (date, starts) in &per_day {
                            cache
                                .set(
                                    clinic_id,
                                    &criteria.practitioner_id,
                                    &criteria.business_id,
                                    *date,
                                    starts.clone(),
                                )
                                .await;
                        }
                        // Days inside the span with no slots still get cached
                        // as empty so the next scan skips them.
                        let seen: HashSet<NaiveDate> =
                            per_day.iter().map(|(date, _)| *date).collect();
                        let mut day = span_from;
                        while day <= span_to {
                            if !seen.contains(&day) {
                                cache
                                    .set(
                                        clinic_id,
                                        &criteria.practitioner_id,
                                        &criteria.business_id,
                                        day,
                                        Vec::new(),
                                    )
                                    .await;
                            }
                            day += chrono::Duration::days(1);
                        }

                        let found_any = per_day.iter().any(|(_, starts)| !starts.is_empty());
                        collected.extend(per_day);
                        if found_any {
                            break;
                        }
                    }
                    Ok(SpanResult {
                        criteria_index: index,
                        per_day: collected,
                    })
                }
                .boxed(),
            );
        }

        info!(
            "find-next scan: {} criteria, {} cached slots, {} PMS spans",
            criteria_list.len(),
            immediate.len(),
            branches.len()
        );

        let outcomes = run_with_deadline(branches, self.deadline(), "find_next").await;

        let mut all = immediate;
        let mut partial = false;
        for outcome in outcomes {
            match outcome {
                BranchOutcome::Completed(span) => {
                    for (date, starts) in span.per_day {
                        all.extend(starts.into_iter().map(|starts_at| SlotOffer {
                            criteria_index: span.criteria_index,
                            starts_at,
                            date,
                        }));
                    }
                }
                BranchOutcome::TimedOut => partial = true,
                BranchOutcome::Failed(_) => partial = true,
            }
        }

        // Dedupe across cache/PMS overlap, then filter and order by time.
        let mut seen: HashSet<(i64, usize)> = HashSet::new();
        all.retain(|offer| {
            let key = (offer.starts_at.timestamp(), offer.criteria_index);
            seen.insert(key)
        });

        let filter = self
            .build_filter(clinic, session_id, criteria_list, today, window_end)
            .await;
        let mut outcome = ScanOutcome {
            partial,
            ..Default::default()
        };
        for offer in all {
            let Some(criteria) = criteria_list.get(offer.criteria_index) else {
                continue;
            };
            if filter.admits(criteria, offer.starts_at) {
                outcome.slots.push(offer);
            } else {
                outcome.filtered_out += 1;
            }
        }
        outcome.slots.sort_by_key(|offer| offer.starts_at);

        if outcome.slots.is_empty() && outcome.filtered_out > 0 {
            info!(
                "find-next: every candidate slot was suppressed ({} filtered), reporting no availability",
                outcome.filtered_out
            );
        }
        Ok(outcome)
    }

    // === Question C: which practitioners have any slot on a date ===

    pub async fn available_practitioners(
        &self,
        clinic: &Clinic,
        criteria_list: &[SearchCriteria],
        date: NaiveDate,
        session_id: &SessionId,
    ) -> Result<(Vec<usize>, bool), EngineError> {
        let cache = Arc::new(AvailabilityCache::new(
            self.ctx.store.clone(),
            self.ctx.clock.clone(),
        ));
        let pms = Arc::new(self.ctx.pms_for(clinic).await);
        let tz = self.clinic_tz(clinic);

        let mut branches: Vec<BoxFuture<'static, Result<DayResult, String>>> = Vec::new();
        let mut pruned: HashSet<usize> = HashSet::new();

        for (index, criteria) in criteria_list.iter().enumerate() {
            let schedules =
                catalog::get_practitioner_schedules(&self.ctx.store, &criteria.practitioner_id)
                    .await?;
            if prune_dates_by_schedule(&schedules, criteria, &[date]).is_empty() {
                pruned.insert(index);
                continue;
            }

            let pms = Arc::clone(&pms);
            let cache = Arc::clone(&cache);
            let criteria = criteria.clone();
            let clinic_id = clinic.clinic_id;
            branches.push(
                async move {
                    if let Some(cached) = cache
                        .get(&criteria.practitioner_id, &criteria.business_id, date)
                        .await
                    {
                        return Ok(DayResult {
                            criteria_index: index,
                            starts: cached,
                        });
                    }
                    let per_day = fetch_span(&pms, &criteria, date, date, tz)
                        .await
                        .map_err(|e| e.to_string())?;
                    let starts: Vec<DateTime<Utc>> = per_day
                        .into_iter()
                        .flat_map(|(_, starts)| starts)
                        .collect();
                    cache
                        .set(
                            clinic_id,
                            &criteria.practitioner_id,
                            &criteria.business_id,
                            date,
                            starts.clone(),
                        )
                        .await;
                    Ok(DayResult {
                        criteria_index: index,
                        starts,
                    })
                }
                .boxed(),
            );
        }

        let outcomes = run_with_deadline(branches, self.deadline(), "available_practitioners").await;
        let filter = self
            .build_filter(clinic, session_id, criteria_list, date, date)
            .await;

        let mut available = Vec::new();
        let mut partial = false;
        for outcome in outcomes {
            match outcome {
                BranchOutcome::Completed(day) => {
                    let Some(criteria) = criteria_list.get(day.criteria_index) else {
                        continue;
                    };
                    let has_slot = day
                        .starts
                        .iter()
                        .any(|starts_at| filter.admits(criteria, *starts_at));
                    if has_slot {
                        available.push(day.criteria_index);
                    }
                }
                BranchOutcome::TimedOut | BranchOutcome::Failed(_) => partial = true,
            }
        }

        debug!(
            "available practitioners on {}: {} of {} (pruned {})",
            date,
            available.len(),
            criteria_list.len(),
            pruned.len()
        );
        Ok((available, partial))
    }
}

struct SpanResult {
    criteria_index: usize,
    per_day: Vec<(NaiveDate, Vec<DateTime<Utc>>)>,
}

struct DayResult {
    criteria_index: usize,
    starts: Vec<DateTime<Utc>>,
}

/// One PMS availability call for a date span, grouped per clinic-local civil
/// day to match the cache key (a 9am Sydney slot is the previous UTC date).
/// Also used by the booking coordinator for its authoritative precheck.
pub async fn fetch_span(
    pms: &PmsClient,
    criteria: &SearchCriteria,
    from: NaiveDate,
    to: NaiveDate,
    tz: Tz,
) -> Result<Vec<(NaiveDate, Vec<DateTime<Utc>>)>, PmsError> {
    let raw = pms
        .get_available_times(
            criteria.business_id.as_str(),
            criteria.practitioner_id.as_str(),
            criteria.service_id.as_str(),
            from,
            to,
        )
        .await?;

    let mut per_day: HashMap<NaiveDate, Vec<DateTime<Utc>>> = HashMap::new();
    for slot in &raw {
        match parse_pms_time(&slot.appointment_start) {
            Ok(starts_at) => {
                let local_date = utc_to_local(starts_at, tz).date_naive();
                per_day.entry(local_date).or_default().push(starts_at);
            }
            Err(e) => warn!("unparseable PMS slot '{}': {}", slot.appointment_start, e),
        }
    }

    let mut grouped: Vec<(NaiveDate, Vec<DateTime<Utc>>)> = per_day.into_iter().collect();
    grouped.sort_by_key(|(date, _)| *date);
    for (_, starts) in grouped.iter_mut() {
        starts.sort();
    }
    Ok(grouped)
}
