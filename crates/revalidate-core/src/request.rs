// ── Generic request wrapper ──
//
// Turns a stream of triggers into a stream of results, latest-wins, with
// loading and error side channels. The results stream is the only driver:
// nothing runs unless it is polled.

use futures_core::Stream;

use crate::error::FetchError;
use crate::stream::{ErrorStream, LoadingFlag, switch_latest, with_latest_from};
use crate::track::{ActivityTracker, ERROR_CHANNEL_CAPACITY, ErrorTracker};

/// The outputs of a tracked request pipeline.
///
/// `results` never ends because of an error; errors go to `errors` and
/// only terminate the request that produced them. Dropping `results`
/// cancels the in-flight request and closes both side channels.
#[derive(Debug)]
pub struct Tracked<S> {
    pub results: S,
    pub loading: LoadingFlag,
    pub errors: ErrorStream,
}

/// Run `factory` for every trigger, dropping the previous request.
pub fn track_requests<P, T, S, F>(start: impl Stream<Item = P>, factory: F) -> Tracked<impl Stream<Item = T>>
where
    F: FnMut(P) -> S,
    S: Stream<Item = Result<T, FetchError>>,
{
    track_requests_with_capacity(start, factory, ERROR_CHANNEL_CAPACITY)
}

/// [`track_requests`] with an explicit error channel capacity.
pub fn track_requests_with_capacity<P, T, S, F>(
    start: impl Stream<Item = P>,
    mut factory: F,
    error_capacity: usize,
) -> Tracked<impl Stream<Item = T>>
where
    F: FnMut(P) -> S,
    S: Stream<Item = Result<T, FetchError>>,
{
    let activity = ActivityTracker::new();
    let errors = ErrorTracker::new(error_capacity);
    let loading = activity.subscribe();
    let error_stream = errors.subscribe();

    let results = switch_latest(start, move |params| activity.track(errors.track(factory(params))));

    Tracked {
        results,
        loading,
        errors: error_stream,
    }
}

/// Like [`track_requests`], but triggers carry no data: each one samples
/// the latest value of `params`. Triggers before the first params value
/// are dropped.
pub fn track_requests_on<P, T, S, F>(
    start: impl Stream,
    params: impl Stream<Item = P>,
    factory: F,
) -> Tracked<impl Stream<Item = T>>
where
    P: Clone,
    F: FnMut(P) -> S,
    S: Stream<Item = Result<T, FetchError>>,
{
    track_requests(with_latest_from(start, params), factory)
}
