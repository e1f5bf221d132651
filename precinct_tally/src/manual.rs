/*!

This is the long-form manual for `precinct_tally` and `ptally`.

## Input formats

Results are read as a table with a header line. The following sources are
supported:
* `tsv` tab-delimited text, as published by state boards of elections
* `xlsx` the first (or a named) worksheet of an Excel workbook
* `packs` precompiled per-contest packs written by `ptally precompile`

### Column names

Column names change from one election to the next, so each field is looked
up through a list of aliases. The first alias with a non-empty value wins.
Each alias is tried with its exact spelling first, then with a normalized
spelling (lowercase, punctuation runs replaced by `_`). For example
`Total Votes`, `total votes` and `TOTAL-VOTES` all resolve the vote count.

| field          | aliases                                                  |
|----------------|----------------------------------------------------------|
| county         | `county`, `County`                                       |
| precinct name  | `precinct_name`, `precinct`, `Precinct`, `precinct_desc` |
| precinct code  | `precinct_code`, `precinct_cd`, `precinct_id`            |
| contest id     | `contest_id`, `contest`, `contestid`                     |
| contest title  | `contest_title`, `contest_name`, `contest`, `Contest`    |
| candidate      | `candidate`, `choice`, `Candidate`                       |
| party          | `candidate_party`, `choice_party`, `party`, `Party`      |
| votes          | `vote_ct`, `total votes`, `votes`, `Total Votes`         |
| scope          | `contest_scope`, `contest_sc`, `contest_p`, `scope`      |

A row is dropped when the county, both precinct identifiers, the contest
title or the candidate is missing. Rows for `OVER VOTE` and `UNDER VOTE` are
dropped as well: they count ballot anomalies, not votes. Vote counts accept
thousands separators; anything else that is not a number counts as 0.

### Scope

The scope column is free text in some years and a numeric code in others.
It is classified with a heuristic:
- contains `state` → statewide
- contains `county` → county
- `1` → statewide, `3` → county
- anything else → other

Exact tokens can be mapped explicitly with `scopeOverrides` in the
configuration file; they take precedence over the heuristic.

## Winners and ties

Candidates are considered in the order they first appear in the rows. A
candidate only takes the lead with strictly more votes, so a tie goes to the
candidate that appeared first. Reordering the rows of a tied precinct changes
its winner. The margin is `(winner - runner-up) / total`.

## Contests with several sources

The same office can be reported once per scope, with different contest ids.
Contests with the same title (ignoring case and spacing) are shown as one
contest. Its county and precinct figures are the sums over the sources.

## Folders

A folder is a named list of contests. Its map is coarse: in each precinct,
the whole vote total of each member contest goes to the party that won that
contest there, and the folder winner is the party with the most credited
votes. Candidate names are not compared across contests.

## Boundary data and name reconciliation

The boundary file is a GeoJSON feature collection. Each feature gives a
county, a precinct code and a display name, read from the `county_nam`,
`prec_id` and `enr_desc` properties unless configured otherwise.

`ptally reconcile` lists the precincts whose name in the results differs
from the display name in the boundary file. Corrections are given as a JSON
file of `{county, precinctCode, name}` entries, or `--accept-source` takes
the names from the results. Applying the same corrections twice changes
nothing. With `--write`, the boundary file is written back with the
corrected names.

## Precompiled packs

`ptally precompile` writes `manifest.json` and one file per contest source
under `contests/`. Loading packs does not recompute anything: winners,
margins and winning parties are used as stored.

*/
