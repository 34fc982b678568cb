// LLM-friendly documentation endpoint content.

pub const LLMS_TXT: &str = r#"# Zero Sanity Backend API
> Headhunt (gacha) tracker and operator stat calculator for the Zero Sanity Arknights: Endfield community site.

## API Base URL
/api/

## Authentication
Bearer token (JWT from /api/auth/login or API key from /api/api-keys).
API keys carry scopes: pulls:read, pulls:write.

## Rate Limits
60 pull submissions and 10 new API keys per user per hour. Over the limit: HTTP 429 with a Retry-After header (seconds).

## Key Endpoints
- POST /api/auth/register - Create account
- POST /api/auth/login - Get JWT token
- GET /api/auth/me - Get current user info
- POST /api/headhunt/pulls - Submit the full pull list for one banner (replaces any earlier submission)
- GET /api/headhunt/stats?banner= - Global drop rates, most pulled 6★/5★, per-banner breakdown
- GET /api/headhunt/leaderboard?banner=&sort=pulls|lucky&limit= - Player leaderboard (limit max 100; lucky needs 10+ pulls)
- GET /api/headhunt/history - Your banners with current pity
- GET /api/operators/{name}/stats?level=&breakthrough=&talent= - Operator stats at a level
- GET/POST /api/api-keys - List/create API keys
- DELETE /api/api-keys/{id} - Revoke an API key

## Pull Submission Body
{
  "banner": "string",
  "bannerType": "operator" | "weapon" | "standard",
  "pulls": [{ "name": "string", "rarity": 3 | 4 | 5 | 6, "itemType": "operator" | "weapon" }],
  "region": "string (optional)",
  "importSource": "string (optional, default manual)"
}
Pulls are in the order they were made; the last entry is the most recent.

## Pity
Pulls since the most recent 6★, counting that 6★. With no 6★ it is the number of pulls on the banner.
"#;
