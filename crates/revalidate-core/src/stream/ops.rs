// ── Stream operators ──
//
// The handful of combinators the request wrapper and the paginator are
// built from. All of them are driven by whoever polls the output stream;
// nothing is spawned.

use std::future::{Future, pending, ready};
use std::pin::Pin;

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::trace;

/// Poll the current inner stream, or stay pending forever when there is none.
pub(crate) fn next_inner<S: Stream>(
    inner: &mut Option<Pin<Box<S>>>,
) -> impl Future<Output = Option<S::Item>> + '_ {
    async move {
        match inner {
            Some(stream) => stream.next().await,
            None => pending().await,
        }
    }
}

enum Switch<P, T> {
    Trigger(Option<P>),
    Item(Option<T>),
}

/// Map every trigger to an inner stream and forward only the newest one.
///
/// A new trigger drops the previous inner stream, cancelling whatever it
/// had in flight. The output ends once the triggers end and the last inner
/// stream has finished.
pub fn switch_latest<P, S, F>(triggers: impl Stream<Item = P>, mut f: F) -> impl Stream<Item = S::Item>
where
    S: Stream,
    F: FnMut(P) -> S,
{
    async_stream::stream! {
        let mut triggers = Box::pin(triggers);
        let mut inner: Option<Pin<Box<S>>> = None;
        let mut triggers_done = false;

        loop {
            if triggers_done && inner.is_none() {
                break;
            }

            let step = tokio::select! {
                biased;
                next = triggers.next(), if !triggers_done => Switch::Trigger(next),
                item = next_inner(&mut inner) => Switch::Item(item),
            };

            match step {
                Switch::Trigger(Some(params)) => {
                    if inner.is_some() {
                        trace!("superseding in-flight inner stream");
                    }
                    inner = Some(Box::pin(f(params)));
                }
                Switch::Trigger(None) => triggers_done = true,
                Switch::Item(Some(item)) => {
                    yield item;
                }
                Switch::Item(None) => inner = None,
            }
        }
    }
}

enum Sample<T, P> {
    Trigger(Option<T>),
    Params(Option<P>),
}

/// On every trigger, emit the latest value seen on `params`.
///
/// Triggers that arrive before `params` has produced anything are dropped.
/// The output ends when the triggers end.
pub fn with_latest_from<T, P>(
    triggers: impl Stream<Item = T>,
    params: impl Stream<Item = P>,
) -> impl Stream<Item = P>
where
    P: Clone,
{
    async_stream::stream! {
        let mut triggers = Box::pin(triggers);
        let mut params = Box::pin(params);
        let mut latest: Option<P> = None;
        let mut params_done = false;

        loop {
            let step = tokio::select! {
                biased;
                value = params.next(), if !params_done => Sample::Params(value),
                trigger = triggers.next() => Sample::Trigger(trigger),
            };

            match step {
                Sample::Params(Some(value)) => latest = Some(value),
                Sample::Params(None) => params_done = true,
                Sample::Trigger(Some(_)) => match latest {
                    Some(ref value) => {
                        yield value.clone();
                    }
                    None => trace!("trigger before any params, dropping"),
                },
                Sample::Trigger(None) => break,
            }
        }
    }
}

/// Drop items while `is_open` rejects the gate's current value.
///
/// Dropped items are gone; they don't fire once the gate opens.
pub fn pausable<S, G, F>(stream: S, gate: watch::Receiver<G>, is_open: F) -> impl Stream<Item = S::Item>
where
    S: Stream,
    F: Fn(&G) -> bool,
{
    stream.filter(move |_| {
        let open = is_open(&gate.borrow());
        if !open {
            trace!("gate closed, dropping item");
        }
        ready(open)
    })
}
