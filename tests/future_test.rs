#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use promise_future::{
        executor::{self, ExecutionContext, ThreadSpawner},
        Cancelled, Future, Promise,
    };
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc::channel,
            Arc, Barrier, Mutex,
        },
        thread,
        time::Duration,
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_concurrent_writes_settle_once() {
        let ctx = executor::global();
        let (future, setter) = Future::<usize, ()>::pending();
        let setter = Arc::new(setter);
        let (tx, rx) = channel();
        for _ in 0..8 {
            let tx = tx.clone();
            future.on_success(&ctx, move |v| tx.send(v).unwrap());
        }

        let barrier = Arc::new(Barrier::new(16));
        let winners: Vec<_> = (0..16)
            .map(|i| {
                let setter = setter.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    setter.success(i).then_some(i)
                })
            })
            .collect();
        let winners: Vec<usize> = winners
            .into_iter()
            .filter_map(|task| task.join().expect("writer thread panicked"))
            .collect();
        assert_eq!(winners.len(), 1);

        for _ in 0..8 {
            assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), winners[0]);
        }
        assert_eq!(future.wait(), Ok(Ok(winners[0])));
    }

    #[test]
    fn test_no_double_delivery_under_racing_subscribe() {
        let ctx: ExecutionContext = Arc::new(ThreadSpawner);
        for _ in 0..50 {
            let (future, setter) = Future::<u32, ()>::pending();
            let counts = Arc::new(Mutex::new(HashMap::new()));
            let barrier = Arc::new(Barrier::new(5));

            let subscribers: Vec<_> = (0..4)
                .map(|id| {
                    let future = future.clone();
                    let counts = counts.clone();
                    let barrier = barrier.clone();
                    let ctx = ctx.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        future.on_result(&ctx, move |_| {
                            *counts.lock().unwrap().entry(id).or_insert(0) += 1;
                        });
                    })
                })
                .collect();
            barrier.wait();
            setter.success(1);
            for task in subscribers {
                task.join().expect("subscriber thread panicked");
            }

            let mut settled = false;
            for _ in 0..500 {
                if counts.lock().unwrap().len() == 4 {
                    settled = true;
                    break;
                }
                thread::sleep(Duration::from_millis(2));
            }
            assert!(settled, "every subscriber should be called");
            thread::sleep(Duration::from_millis(10));
            assert!(counts.lock().unwrap().values().all(|&n| n == 1));
        }
    }

    #[test]
    fn test_subscribe_long_after_completion() {
        let ctx = executor::global();
        let future = Future::<&str, ()>::success("kept");
        thread::sleep(Duration::from_millis(1000));
        let (tx, rx) = channel();
        future.on_result(&ctx, move |result| tx.send(result).unwrap());
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Ok("kept"));
    }

    #[test]
    fn test_wait_matches_delivered_result() {
        let ctx = executor::global();
        let (future, setter) = Future::<u32, String>::pending();
        let (tx, rx) = channel();
        future.on_result(&ctx, move |result| tx.send(result).unwrap());
        let waiter = {
            let future = future.clone();
            thread::spawn(move || future.wait())
        };
        thread::sleep(Duration::from_millis(20));
        setter.error("💥".into());

        let delivered = rx.recv_timeout(TIMEOUT).unwrap();
        let waited = waiter.join().expect("waiter thread panicked");
        assert_eq!(waited, Ok(delivered.clone()));
        assert_eq!(future.wait(), Ok(delivered));
    }

    #[test]
    fn test_wait_on_cancelled_future() {
        let (future, setter) = Future::<u32, ()>::pending();
        let waiter = {
            let future = future.clone();
            thread::spawn(move || future.wait())
        };
        thread::sleep(Duration::from_millis(20));
        setter.cancel();
        assert_eq!(waiter.join().expect("waiter thread panicked"), Err(Cancelled));
    }

    #[test]
    fn test_two_consumers_await_same_future() {
        let (future, setter) = Future::<String, ()>::pending();
        let consumer1 = future.clone();
        let consumer2 = future;
        let task1 = thread::spawn(move || block_on(async { consumer1.await }));
        let task2 = thread::spawn(move || block_on(async { consumer2.await }));
        let task3 = thread::spawn(move || setter.success(String::from("🍓")));
        task3.join().expect("The task3 thread has panicked");
        let expected = Ok(Ok(String::from("🍓")));
        assert_eq!(task1.join().expect("The task1 thread has panicked"), expected);
        assert_eq!(task2.join().expect("The task2 thread has panicked"), expected);
    }

    #[test]
    fn test_producer_learns_about_cancellation() {
        let (future, setter) = Future::<u32, ()>::pending();
        let aborted = Arc::new(AtomicUsize::new(0));
        let worker = {
            let aborted = aborted.clone();
            thread::spawn(move || {
                let flag = aborted.clone();
                setter.on_cancel(move || {
                    flag.fetch_add(1, Ordering::SeqCst);
                });
                while !setter.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                // Late write after cancellation is dropped.
                setter.success(1)
            })
        };
        thread::sleep(Duration::from_millis(20));
        future.cancel();
        assert!(!worker.join().expect("worker thread panicked"));
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
        assert_eq!(future.peek(), None);
    }

    #[test]
    fn test_timeout_by_external_cancel() {
        let (future, _setter) = Future::<u32, ()>::pending();
        let timer = {
            let future = future.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                future.cancel();
            })
        };
        assert_eq!(future.wait(), Err(Cancelled));
        timer.join().expect("timer thread panicked");
    }
}
