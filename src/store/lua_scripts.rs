/// Lua script for fixed window counting
///
/// Increment, first-hit expiry and TTL lookup run as one atomic unit, so two
/// concurrent requests can never both observe the pre-increment value and the
/// window is never extended by later hits.
///
/// KEYS[1] = the counter key
/// ARGV[1] = window duration (seconds)
///
/// Returns: [count after increment, ttl seconds]
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])

local current = redis.call('INCR', key)

-- Arm the window on the 0 -> 1 transition only
if current == 1 then
    redis.call('EXPIRE', key, window)
end

local ttl = redis.call('TTL', key)
if ttl < 0 then
    ttl = window
end

return {current, ttl}
"#;
