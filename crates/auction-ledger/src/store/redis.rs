//! Redis-backed key-value store.
//!
//! Plain commands go straight through a [`ConnectionManager`]. The compound
//! operations are Lua scripts, which Redis runs without interleaving any
//! other client's commands.

use super::{AppendOutcome, BidAppend, BidRemoval, KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};

/// Sets `closed` on an item and returns the previous value (-1 if missing).
const SWAP_CLOSED_FLAG_SCRIPT: &str = r#"
local raw = redis.call("GET", KEYS[1])
if not raw then
    return -1
end
local item = cjson.decode(raw)
local previous = 0
if item["closed"] == true then
    previous = 1
end
item["closed"] = (ARGV[1] == "1")
redis.call("SET", KEYS[1], cjson.encode(item))
return previous
"#;

/// Compares against the top bid, then appends and publishes in one step.
const APPEND_BID_SCRIPT: &str = r#"
local bidsKey = KEYS[1]
local channel = ARGV[1]
local amount = tonumber(ARGV[2])
local increment = tonumber(ARGV[3])
local last = redis.call("LRANGE", bidsKey, -1, -1)
if #last > 0 then
    local ok, top = pcall(cjson.decode, last[1])
    if not ok or type(top) ~= "table" or tonumber(top["bid"]) == nil then
        return redis.error_reply("corrupt top bid in " .. bidsKey)
    end
    local previous = tonumber(top["bid"])
    if amount < previous + increment then
        return {"too_low", string.format("%d", previous)}
    end
end
redis.call("RPUSH", bidsKey, ARGV[4])
redis.call("PUBLISH", channel, ARGV[5])
return {"appended", ""}
"#;

/// Removes the first bid with a matching id and publishes `deleteBid`.
const REMOVE_BID_SCRIPT: &str = r#"
local bidsKey = KEYS[1]
local channel = ARGV[1]
local itemId = ARGV[2]
local bidId = ARGV[3]
local bids = redis.call("LRANGE", bidsKey, 0, -1)
for _, raw in ipairs(bids) do
    local ok, info = pcall(cjson.decode, raw)
    if ok and type(info) == "table" and info["id"] == bidId then
        redis.call("LREM", bidsKey, 1, raw)
        redis.call("PUBLISH", channel, cjson.encode({
            event = "deleteBid",
            itemId = itemId,
            bidId = bidId,
            bid = info["bid"],
            bidder = info["bidder"],
            bidderDisplayName = info["bidderDisplayName"],
        }))
        return raw
    end
end
return false
"#;

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

/// Redis implementation of [`KeyValueStore`].
///
/// # Example
///
/// ```rust,no_run
/// use auction_ledger::store::redis::RedisStore;
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let store = RedisStore::connect("redis://127.0.0.1:6379").await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    swap_closed_flag: Script,
    append_bid: Script,
    remove_bid: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client =
            Client::open(redis_url).map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::from_client(client).await
    }

    /// Connect using an existing client.
    pub async fn from_client(client: Client) -> StoreResult<Self> {
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            swap_closed_flag: Script::new(SWAP_CLOSED_FLAG_SCRIPT),
            append_bid: Script::new(APPEND_BID_SCRIPT),
            remove_bid: Script::new(REMOVE_BID_SCRIPT),
        })
    }
}

fn script_error(e: RedisError) -> StoreError {
    match StoreError::from(e) {
        StoreError::Command(message) => StoreError::Script(message),
        other => other,
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        // Explicit MGET: the AsyncCommands helper sends GET for a single key.
        Ok(redis::cmd("MGET").arg(keys).query_async(&mut conn).await?)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, delta).await?)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, i64>(channel, payload).await?;
        Ok(())
    }

    async fn swap_closed_flag(&self, item_key: &str, closed: bool) -> StoreResult<Option<bool>> {
        let mut conn = self.conn.clone();
        let previous: i64 = self
            .swap_closed_flag
            .key(item_key)
            .arg(if closed { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await
            .map_err(script_error)?;

        Ok(match previous {
            -1 => None,
            flag => Some(flag == 1),
        })
    }

    async fn append_bid(&self, append: BidAppend<'_>) -> StoreResult<AppendOutcome> {
        let mut conn = self.conn.clone();
        let (status, previous): (String, String) = self
            .append_bid
            .key(append.bids_key)
            .arg(append.channel)
            .arg(append.amount_cents)
            .arg(append.min_increment_cents)
            .arg(append.bid_json)
            .arg(append.event_json)
            .invoke_async(&mut conn)
            .await
            .map_err(script_error)?;

        match status.as_str() {
            "appended" => Ok(AppendOutcome::Appended),
            "too_low" => {
                let previous_cents = previous.parse().map_err(|_| {
                    StoreError::Script(format!("unexpected top bid amount {:?}", previous))
                })?;
                Ok(AppendOutcome::TooLow { previous_cents })
            }
            other => Err(StoreError::Script(format!("unexpected append status {:?}", other))),
        }
    }

    async fn remove_bid(&self, removal: BidRemoval<'_>) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let removed: Option<String> = self
            .remove_bid
            .key(removal.bids_key)
            .arg(removal.channel)
            .arg(removal.item_id)
            .arg(removal.bid_id)
            .invoke_async(&mut conn)
            .await
            .map_err(script_error)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_error_classification() {
        let refused = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(StoreError::from(refused), StoreError::Connection(_)));

        let rejected = RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(matches!(StoreError::from(rejected), StoreError::Command(_)));
        let rejected = RedisError::from((redis::ErrorKind::ResponseError, "boom"));
        assert!(matches!(script_error(rejected), StoreError::Script(_)));
    }

    #[test]
    fn test_scripts_touch_declared_keys_only() {
        for script in [SWAP_CLOSED_FLAG_SCRIPT, APPEND_BID_SCRIPT, REMOVE_BID_SCRIPT] {
            assert!(!script.contains("KEYS[2]"));
        }
    }
}
