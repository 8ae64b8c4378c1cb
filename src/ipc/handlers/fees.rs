use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_page, get_required_date, get_required_f64,
    get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::listview::{paginate, FilterSet};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn fetch_fees(conn: &Connection, today: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT f.id, f.student_id, s.first_name, s.last_name, s.class_id, s.admission_no,
                    f.fee_type, f.amount, f.due_date, f.status, f.paid_date, f.method
             FROM fees f
             JOIN students s ON s.id = f.student_id
             ORDER BY f.due_date, s.last_name, s.first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let today = today.to_string();
    stmt.query_map([], move |r| {
        let first: String = r.get(2)?;
        let last: String = r.get(3)?;
        let due_date: String = r.get(8)?;
        let status: String = r.get(9)?;
        // An unpaid fee past its due date reports as overdue; nothing is
        // rewritten in storage.
        let effective_status = if status == "unpaid" && due_date.as_str() < today.as_str() {
            "overdue".to_string()
        } else {
            status.clone()
        };
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "studentId": r.get::<_, String>(1)?,
            "studentName": format!("{} {}", first, last),
            "classId": r.get::<_, String>(4)?,
            "admissionNo": r.get::<_, String>(5)?,
            "feeType": r.get::<_, String>(6)?,
            "amount": r.get::<_, f64>(7)?,
            "dueDate": due_date,
            "status": effective_status,
            "paidDate": r.get::<_, Option<String>>(10)?,
            "method": r.get::<_, Option<String>>(11)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn fees_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let records = fetch_fees(conn, &today)?;

    let due_from = get_optional_date(params, "dueFrom")?;
    let due_to = get_optional_date(params, "dueTo")?;

    let filtered = FilterSet::new()
        .equals(
            "studentId",
            get_optional_str(params, "studentId").as_deref(),
        )
        .equals("classId", get_optional_str(params, "classId").as_deref())
        .equals("status", get_optional_str(params, "status").as_deref())
        .equals("feeType", get_optional_str(params, "feeType").as_deref())
        .search(
            get_optional_str(params, "search").as_deref(),
            &["studentName", "admissionNo", "feeType"],
        )
        .apply(&records);

    // Dedicated due-date range filter on top of the generic set.
    let ranged: Vec<serde_json::Value> = filtered
        .into_iter()
        .filter(|r| {
            let due = r.get("dueDate").and_then(|v| v.as_str()).unwrap_or("");
            if let Some(f) = due_from.as_deref() {
                if due < f {
                    return false;
                }
            }
            if let Some(t) = due_to.as_deref() {
                if due > t {
                    return false;
                }
            }
            true
        })
        .collect();

    let paged = paginate(ranged, get_page(params));
    Ok(json!({
        "fees": paged.items,
        "page": paged.page,
        "totalPages": paged.total_pages,
        "totalCount": paged.total_count,
    }))
}

fn fees_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let fee_type = get_required_str(params, "feeType")?.trim().to_string();
    if fee_type.is_empty() {
        return Err(HandlerErr::bad_params("feeType must not be empty"));
    }
    let amount = get_required_f64(params, "amount")?;
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let due_date = get_required_date(params, "dueDate")?;

    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    let fee_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fees(id, student_id, fee_type, amount, due_date, status)
         VALUES(?, ?, ?, ?, ?, 'unpaid')",
        (&fee_id, &student_id, &fee_type, amount, &due_date),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_table("fees"))?;

    Ok(json!({ "feeId": fee_id }))
}

fn fees_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;

    let existing = conn
        .query_row(
            "SELECT fee_type, amount, due_date FROM fees WHERE id = ?",
            [&fee_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((mut fee_type, mut amount, mut due_date)) = existing else {
        return Err(HandlerErr::not_found("fee not found"));
    };

    if let Some(v) = get_optional_str(params, "feeType") {
        fee_type = v;
    }
    if let Some(v) = params.get("amount").and_then(|v| v.as_f64()) {
        if v <= 0.0 {
            return Err(HandlerErr::bad_params("amount must be positive"));
        }
        amount = v;
    }
    if params.get("dueDate").is_some() {
        if let Some(v) = get_optional_date(params, "dueDate")? {
            due_date = v;
        }
    }

    conn.execute(
        "UPDATE fees SET fee_type = ?, amount = ?, due_date = ? WHERE id = ?",
        (&fee_type, amount, &due_date, &fee_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_table("fees"))?;

    Ok(json!({ "feeId": fee_id }))
}

fn fees_record_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;
    let method = get_required_str(params, "method")?.trim().to_string();
    if method.is_empty() {
        return Err(HandlerErr::bad_params("method must not be empty"));
    }
    let paid_date = match get_optional_date(params, "paidDate")? {
        Some(d) => d,
        None => Utc::now().format("%Y-%m-%d").to_string(),
    };

    let status: Option<String> = conn
        .query_row("SELECT status FROM fees WHERE id = ?", [&fee_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(status) = status else {
        return Err(HandlerErr::not_found("fee not found"));
    };
    if status == "paid" {
        return Err(HandlerErr::bad_params("fee is already paid"));
    }

    conn.execute(
        "UPDATE fees SET status = 'paid', paid_date = ?, method = ? WHERE id = ?",
        (&paid_date, &method, &fee_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_table("fees"))?;

    Ok(json!({ "feeId": fee_id, "paidDate": paid_date }))
}

fn fees_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;
    let n = conn
        .execute("DELETE FROM fees WHERE id = ?", [&fee_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_table("fees"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("fee not found"));
    }
    Ok(json!({ "ok": true }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.list" => Some(with_conn(state, req, fees_list)),
        "fees.create" => Some(with_conn(state, req, fees_create)),
        "fees.update" => Some(with_conn(state, req, fees_update)),
        "fees.recordPayment" => Some(with_conn(state, req, fees_record_payment)),
        "fees.delete" => Some(with_conn(state, req, fees_delete)),
        _ => None,
    }
}
