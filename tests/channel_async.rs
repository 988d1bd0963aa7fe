mod common;
use common::*;

use weft::{Channel, RingBuffer, State};

// --- Rendezvous and backpressure ---

#[tokio::test]
async fn unbuffered_put_suspends_until_take() {
  let ch = Channel::new();
  let mut put = ch.put(1);
  assert_pending(&mut put).await;

  assert_eq!(within(ch.take()).await, Some(1));
  within(put).await.expect("put must resolve once taken");
}

#[tokio::test]
async fn bounded_put_suspends_when_full() {
  let ch = Channel::bounded(2);
  within(ch.put(1)).await.unwrap();
  within(ch.put(2)).await.unwrap();

  let mut overflow = ch.put(3);
  assert_pending(&mut overflow).await;

  // One take frees a slot and the suspended put lands in the buffer.
  assert_eq!(within(ch.take()).await, Some(1));
  within(overflow).await.unwrap();
  assert_eq!(ch.len(), 2);
}

#[tokio::test]
async fn fifo_order_preserved() {
  let ch = Channel::bounded(ITEMS_MEDIUM);
  for i in 0..ITEMS_MEDIUM {
    ch.put(i).await.unwrap();
  }
  ch.close();

  let drained = within(ch.to_vec()).await;
  assert_eq!(drained, (0..ITEMS_MEDIUM).collect::<Vec<_>>());
}

#[tokio::test]
async fn takes_match_registration_order() {
  let ch = Channel::new();
  let first = ch.take();
  let second = ch.take();

  let _ = ch.put("a");
  let _ = ch.put("b");

  assert_eq!(within(first).await, Some("a"));
  assert_eq!(within(second).await, Some("b"));
}

// --- Close, drain, end ---

#[tokio::test]
async fn close_drains_pending_put_then_ends() {
  let ch = Channel::new();
  let _put = ch.put('A');
  ch.close();

  assert_eq!(within(ch.take()).await, Some('A'));
  assert_eq!(within(ch.take()).await, None);
  within(ch.done()).await;
  assert_eq!(ch.state(), State::Ended);
}

#[tokio::test]
async fn tails_deliver_after_puts_before_end() {
  let ch = Channel::new();
  let _tail = ch.tail(99);
  let _a = ch.put(1);
  let _b = ch.put(2);
  ch.close();

  assert_eq!(within(ch.to_vec()).await, vec![1, 2, 99]);
  within(ch.done()).await;
}

#[tokio::test]
async fn operations_after_end_resolve_immediately() {
  let ch = Channel::from_iter(std::iter::empty::<u32>(), false);
  within(ch.done()).await;
  assert_eq!(ch.state(), State::Ended);

  assert_eq!(within(ch.take()).await, None);
  assert_eq!(ch.put(7).await.map_err(|e| e.into_inner()), Err(7));
  assert_eq!(ch.tail(8).await.map_err(|e| e.into_inner()), Err(8));
}

#[tokio::test]
async fn put_after_close_hands_value_back() {
  let ch = Channel::bounded(1);
  ch.close();
  match ch.put(7).await {
    Err(err) => assert_eq!(err.into_inner(), 7),
    Ok(()) => panic!("put on a closed channel must be rejected"),
  }
}

#[tokio::test]
async fn end_listeners_fire_exactly_once_each() {
  let ch = Channel::bounded(1);
  let first = ch.done();
  let second = ch.done();

  ch.put(1).await.unwrap();
  ch.close();
  assert_eq!(within(ch.take()).await, Some(1));

  within(first).await;
  within(second).await;
  // Registration after the end resolves immediately.
  within(ch.done()).await;
}

// --- Construction forms ---

#[tokio::test]
async fn from_iter_round_trips() {
  let ch = Channel::from_iter(["a", "b", "c"], false);
  assert_eq!(within(ch.to_vec()).await, vec!["a", "b", "c"]);
  within(ch.done()).await;
}

#[tokio::test]
async fn from_iter_keep_open_accepts_more() {
  let ch = Channel::from_iter([1], true);
  assert_eq!(ch.state(), State::Open);
  assert_eq!(within(ch.take()).await, Some(1));

  ch.put(2).await.unwrap();
  ch.close();
  assert_eq!(within(ch.to_vec()).await, vec![2]);
}

#[tokio::test]
async fn with_buffer_delivers_prefilled_values_first() {
  let mut ring = RingBuffer::new(3);
  ring.push_back(1);
  ring.push_back(2);

  let ch = Channel::with_buffer(ring);
  ch.put(3).await.unwrap();
  ch.close();
  assert_eq!(within(ch.to_vec()).await, vec![1, 2, 3]);
}

// --- Introspection ---

#[tokio::test]
async fn len_counts_buffered_and_pending() {
  let buffered = Channel::bounded(4);
  buffered.put(1).await.unwrap();
  buffered.put(2).await.unwrap();
  assert_eq!(buffered.len(), 2);
  assert_eq!(buffered.capacity(), Some(4));
  assert!(!buffered.is_empty());

  let direct = Channel::new();
  assert_eq!(direct.capacity(), None);
  assert!(direct.is_empty());
  let _pending = direct.put(9);
  assert_eq!(direct.len(), 1);
}

#[tokio::test]
async fn clones_share_one_channel() {
  let ch = Channel::bounded(1);
  let other = ch.clone();
  assert!(ch.same_channel(&other));
  assert!(!ch.same_channel(&Channel::bounded(1)));

  other.put(5).await.unwrap();
  assert_eq!(within(ch.take()).await, Some(5));
}
