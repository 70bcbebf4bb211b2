/*!

This is the long-form manual for `election_core` and `ballotbox`.

## Voting rules

An election has a fixed list of nominees, a vote cap (`maxVotes`) and a
closed flag. A vote is accepted when all of the following hold, checked in
this order:

1. the name, email and phone are well formed
2. the election is open
3. fewer than `maxVotes` votes are recorded (otherwise the election is closed)
4. nobody voted with the same email, and nobody voted from the same origin
5. the nominee exists

The first failing check decides the rejection:

| kind               | message                                          |
|--------------------|--------------------------------------------------|
| `VALIDATION_ERROR` | `Valid name is required`, `Valid email is required`, ... |
| `ELECTION_CLOSED`  | `Voting has been closed`                         |
| `DUPLICATE_EMAIL`  | `This email has already been used to vote`       |
| `DUPLICATE_ORIGIN` | `A vote has already been cast from this device`  |
| `INVALID_NOMINEE`  | `Invalid nominee`                                |
| `STORAGE_FAILURE`  | `Failed to record vote. Please try again.`       |
| `INTERNAL_FAULT`   | `An unexpected error occurred`                   |

Emails are compared after trimming and lower-casing. The origin is the first
address of the `x-forwarded-for` header, then `cf-connecting-ip`, then the
literal `unknown`. All the voters without a usable origin share `unknown`,
so only the first of them can vote.

A `STORAGE_FAILURE` is safe to retry. If the first attempt was actually
recorded, the retry is rejected with `DUPLICATE_EMAIL`.

## Closing

The election closes when an administrator asks for it, or when the vote
that fills the cap is recorded. Under heavy concurrent load a few votes may
land past the cap before every request sees the close. Closing a closed
election does nothing.

A reset removes all the votes and reopens the election.

## Counters

Each nominee has a vote counter. The counters are a cache: the recorded
votes are the truth. When a counter cannot be incremented it is recomputed
from the votes, and `ballotbox audit --repair` recomputes all the counters
that drifted.

## Configuration file

```json
{
  "election": { "maxVotes": 60, "title": "Class representative" },
  "nominees": [
    { "id": "n1", "name": "Ada", "photoUrl": "https://example.com/ada.png", "description": "..." },
    { "id": "n2", "name": "Grace" }
  ],
  "storage": { "snapshotPath": "state.json", "lockTimeoutMs": 2000 },
  "server": { "bind": "127.0.0.1:8080", "adminToken": "change me" }
}
```

- `maxVotes` defaults to 60.
- `election.limits` may set `maxNameLength` (default 100), `maxEmailLength`
  (255) and `maxPhoneLength` (20). Each must be positive.
- `snapshotPath` is relative to the configuration file. Without it, votes
  only live as long as the process.
- `BALLOTBOX_BIND` and `BALLOTBOX_ADMIN_TOKEN` override the `server` section.
- Without an admin token, the administrative routes answer 403.

## HTTP interface

| route                  | description                                  |
|------------------------|----------------------------------------------|
| `POST /cast-vote`      | body `{"name", "email", "phone", "nominee_id"}` |
| `GET /results`         | live results, with the winner once decided   |
| `GET /healthz`         | liveness and counter drift                   |
| `POST /admin/close`    | closes the election                          |
| `POST /admin/reset`    | clears the votes and reopens                 |
| `GET /admin/voters`    | voters, newest first, `?search=` to filter   |
| `GET /admin/voters.csv`| the same as CSV                              |

Administrative routes need the `x-admin-token` header.

Rejections are answered with 400 and `{"error": <message>, "kind": <kind>}`.
Storage failures and internal faults are answered with 500.

## Command line

```bash
ballotbox serve --config election.json
ballotbox cast --config election.json --name Ada --email ada@example.com --nominee n1 --origin 10.0.0.1
ballotbox results --config election.json --reference expected.json
ballotbox export --config election.json --out voters.csv
ballotbox audit --config election.json --repair
ballotbox close --config election.json
ballotbox reset --config election.json
```

*/
