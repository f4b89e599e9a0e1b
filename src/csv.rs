use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{Account, BetRequest, Command, ResultId, UserId};
use crate::Amount;

/// Errors that can occur when reading a journal
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open journal: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    at: Option<DateTime<Utc>>,
    op: String,
    user: Option<UserId>,
    number: Option<u32>,
    amount: Option<Amount>,
    round: Option<u32>,
    date: Option<NaiveDate>,
    round1: Option<u32>,
    round2: Option<u32>,
    result: Option<ResultId>,
}

impl InputRow {
    fn require<T>(&self, line: usize, field: &'static str, value: Option<T>) -> Result<T, CsvError> {
        value.ok_or_else(|| CsvError::MissingField {
            line,
            op: self.op.clone(),
            field,
        })
    }

    fn into_command(self, line: usize) -> Result<Command, CsvError> {
        let command = match self.op.as_str() {
            "open" => Command::OpenAccount {
                user: self.require(line, "user", self.user)?,
            },
            "deposit" => Command::Deposit {
                user: self.require(line, "user", self.user)?,
                amount: self.require(line, "amount", self.amount)?,
                at: self.require(line, "at", self.at)?,
            },
            "withdraw" => Command::Withdraw {
                user: self.require(line, "user", self.user)?,
                amount: self.require(line, "amount", self.amount)?,
                at: self.require(line, "at", self.at)?,
            },
            "bet" => Command::PlaceBet {
                request: BetRequest {
                    user: self.require(line, "user", self.user)?,
                    number: self.require(line, "number", self.number)?,
                    amount: self.require(line, "amount", self.amount)?,
                    round: self.require(line, "round", self.round)?,
                },
                at: self.require(line, "at", self.at)?,
            },
            "result" => Command::PublishResult {
                date: self.require(line, "date", self.date)?,
                round1: self.round1,
                round2: self.round2,
            },
            "settle" => Command::Settle {
                result: self.require(line, "result", self.result)?,
                at: self.require(line, "at", self.at)?,
            },
            other => {
                return Err(CsvError::UnrecognizedOp {
                    line,
                    op: other.to_string(),
                });
            }
        };
        Ok(command)
    }
}

#[derive(Debug, Serialize)]
struct OutputRow {
    user: UserId,
    balance: String,
}

/// Read journal commands from a csv file
pub fn read_journal(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_command(line)
        }))
}

/// Write account balances in csv format
pub fn write_accounts(
    writer: impl io::Write,
    accounts: impl IntoIterator<Item = Account>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for account in accounts {
        writer.serialize(OutputRow {
            user: account.id,
            balance: account.balance.to_string(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "at,op,user,number,amount,round,date,round1,round2,result\n";

    fn write_csv(rows: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        file.write_all(rows.as_bytes()).unwrap();
        file
    }

    fn read(rows: &str) -> Vec<Result<Command, CsvError>> {
        let file = write_csv(rows);
        read_journal(file.path()).unwrap().collect()
    }

    #[test]
    fn read_bet() {
        let results = read("2025-03-28T08:30:00Z,bet,1,42,100,1,,,,\n");
        assert_eq!(results.len(), 1);

        match results.into_iter().next().unwrap().unwrap() {
            Command::PlaceBet { request, at } => {
                assert_eq!(request.user, 1);
                assert_eq!(request.number, 42);
                assert_eq!(request.amount, Amount::new(100));
                assert_eq!(request.round, 1);
                assert_eq!(at, "2025-03-28T08:30:00Z".parse::<DateTime<Utc>>().unwrap());
            }
            other => panic!("expected bet, got {other:?}"),
        }
    }

    #[test]
    fn read_result_with_one_round() {
        let results = read(",result,,,,,2025-03-28,,25,\n");
        match results.into_iter().next().unwrap().unwrap() {
            Command::PublishResult {
                date,
                round1,
                round2,
            } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 28).unwrap());
                assert_eq!(round1, None);
                assert_eq!(round2, Some(25));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn read_with_whitespace() {
        let results = read(" , open , 7 , , , , , , , \n");
        assert!(matches!(results[0], Ok(Command::OpenAccount { user: 7 })));
    }

    #[test]
    fn read_returns_error_for_unknown_op() {
        let results = read(",refund,1,,10,,,,,\n");
        assert!(matches!(
            results[0],
            Err(CsvError::UnrecognizedOp { line: 2, .. })
        ));
    }

    #[test]
    fn read_returns_error_for_missing_field() {
        let results = read("2025-03-28T08:30:00Z,open,1,,,,,,,\n2025-03-28T08:30:00Z,deposit,1,,,,,,,\n");
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(CsvError::MissingField {
                line: 3,
                field: "amount",
                ..
            })
        ));
    }

    #[test]
    fn read_returns_error_for_bad_timestamp() {
        let results = read("yesterday,deposit,1,,100,,,,,\n");
        assert!(matches!(results[0], Err(CsvError::Parse { line: 2, .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            read_journal("/nonexistent/journal.csv"),
            Err(CsvError::Open(_))
        ));
    }

    #[test]
    fn write_balances() {
        let mut out = Vec::new();
        write_accounts(
            &mut out,
            [
                Account {
                    id: 1,
                    balance: Amount::new(8900),
                },
                Account {
                    id: 2,
                    balance: Amount::ZERO,
                },
            ],
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "user,balance\n1,8900\n2,0\n");
    }
}
