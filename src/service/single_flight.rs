use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::sync::{watch, Mutex};

use crate::error::Error;

type Outcome<V> = Result<V, Arc<Error>>;

/// 同鍵並行請求合流。
///
/// 以鍵對 watch channel 的表為核心：第一個請求成為領頭，工作以
/// `tokio::spawn` 獨立執行，任何等待者 (含發起者) 被取消都不會中斷它；
/// 完成時先自表中移除鍵再發布結果，之後抵達的請求開啟新的一輪。
pub struct SingleFlight<V> {
    in_flight: Arc<Mutex<HashMap<String, watch::Receiver<Option<Outcome<V>>>>>>,
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        SingleFlight {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 執行或加入既有的同鍵請求，所有呼叫者收到同一份結果。
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> Result<V, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Error>> + Send + 'static,
    {
        let (mut rx, leader_tx) = {
            let mut map = self.in_flight.lock().await;
            match map.get(key) {
                Some(rx) => (rx.clone(), None),
                None => {
                    let (tx, rx) = watch::channel(None::<Outcome<V>>);
                    map.insert(key.to_string(), rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        if let Some(tx) = leader_tx {
            let future = make();
            let in_flight = Arc::clone(&self.in_flight);
            let key = key.to_string();

            tokio::spawn(async move {
                let outcome: Outcome<V> = future.await.map_err(Arc::new);
                // 先移除再發布，發布後抵達的請求開啟新的一輪
                in_flight.lock().await.remove(&key);
                let _ = tx.send(Some(outcome));
            });
        }

        loop {
            let ready = rx.borrow_and_update().clone();
            if let Some(outcome) = ready {
                return outcome.map_err(Error::from);
            }
            if rx.changed().await.is_err() {
                return Err(Error::Cancelled);
            }
        }
    }
}
